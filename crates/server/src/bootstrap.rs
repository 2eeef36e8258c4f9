use std::sync::Arc;

use campusflow_core::audit::TracingAuditSink;
use campusflow_core::config::{AppConfig, ConfigError, LoadOptions};
use campusflow_core::notify::TracingNotifier;
use campusflow_core::roles::RoleResolver;
use campusflow_core::session::SessionIssuer;
use campusflow_core::validation::SubmissionValidator;
use campusflow_db::repositories::{SqlIdentityRepository, SqlRequestRepository};
use campusflow_db::{
    connect_with_settings, migrations, AttachmentPolicy, DbPool, FsAttachmentStore,
    LifecycleService, QueryService,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let api = wire(&config, &db_pool);
    info!(
        event_name = "system.bootstrap.services_wired",
        correlation_id = "bootstrap",
        attachments_directory = %config.attachments.directory.display(),
        allowed_email_domain = config.auth.allowed_email_domain.as_deref().unwrap_or("any"),
        "lifecycle services wired"
    );

    Ok(Application { config, db_pool, api })
}

fn wire(config: &AppConfig, db_pool: &DbPool) -> ApiState {
    let requests = Arc::new(SqlRequestRepository::new(db_pool.clone()));
    let identities = Arc::new(SqlIdentityRepository::new(db_pool.clone()));
    let attachments = Arc::new(FsAttachmentStore::new(
        db_pool.clone(),
        config.attachments.directory.clone(),
        AttachmentPolicy::from_config(&config.attachments),
    ));

    let lifecycle = LifecycleService::new(
        requests.clone(),
        attachments.clone(),
        SubmissionValidator::new(config.eligibility.clone()),
        Arc::new(TracingAuditSink),
    )
    .with_notifier(Arc::new(TracingNotifier));

    ApiState {
        lifecycle: Arc::new(lifecycle),
        queries: Arc::new(QueryService::new(requests)),
        identities,
        attachments,
        sessions: SessionIssuer::new(
            config.auth.session_secret.clone(),
            config.auth.session_ttl_secs,
        ),
        resolver: RoleResolver::new(config.auth.allowed_email_domain.clone()),
        max_upload_bytes: usize::try_from(config.attachments.max_bytes).unwrap_or(usize::MAX),
    }
}
