//! Issues a bearer session token for a stored identity. Stands in for the
//! sign-in exchange when driving the API by hand.

use campusflow_core::roles::RoleResolver;
use campusflow_core::session::SessionIssuer;
use campusflow_db::repositories::{IdentityRepository, SqlIdentityRepository};
use chrono::Utc;

use crate::commands::{open_migrated_pool, prepare, CommandFailure, CommandResult};

pub fn run(email: &str) -> CommandResult {
    let (config, runtime) = match prepare("token") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result: Result<String, CommandFailure> = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let lookup = SqlIdentityRepository::new(pool.clone()).find_by_email(email).await;
        pool.close().await;

        let identity = lookup
            .map_err(|error| ("db_query", error.to_string(), 4u8))?
            .ok_or_else(|| ("identity_not_found", format!("no identity with email `{email}`"), 7u8))?;

        let actor = RoleResolver::new(config.auth.allowed_email_domain.clone())
            .resolve(&identity)
            .map_err(|error| ("identity_rejected", error.to_string(), 7u8))?;

        SessionIssuer::new(config.auth.session_secret.clone(), config.auth.session_ttl_secs)
            .issue(actor.actor_id(), Utc::now())
            .map_err(|error| ("token_issue", error.to_string(), 8u8))
    });

    match result {
        Ok(token) => CommandResult::success("token", token),
        Err(failure) => CommandResult::from_failure("token", failure),
    }
}
