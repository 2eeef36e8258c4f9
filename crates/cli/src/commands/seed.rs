use campusflow_db::repositories::SqlIdentityRepository;
use campusflow_db::{SeedDataset, SeededIdentity};

use crate::commands::{open_migrated_pool, prepare, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated_pool(&config).await?;
        let identities = SqlIdentityRepository::new(pool.clone());

        let seeded = SeedDataset::load(&identities)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8));
        let verified: Result<Vec<SeededIdentity>, CommandFailure> = match seeded {
            Ok(seeded) => SeedDataset::verify(&identities)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))
                .and_then(|verification| {
                    if verification.all_present {
                        Ok(seeded.identities_seeded)
                    } else {
                        Err(("seed_verification", verification_message(&verification.checks), 6u8))
                    }
                }),
            Err(failure) => Err(failure),
        };

        pool.close().await;
        verified
    });

    match result {
        Ok(identities) => CommandResult::success("seed", seed_message(&identities)),
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn seed_message(identities: &[SeededIdentity]) -> String {
    let lines = identities
        .iter()
        .map(|identity| format!("  - {}: {} <{}>", identity.role, identity.actor_id, identity.email))
        .collect::<Vec<_>>();
    format!("seeded {} identities:\n{}", identities.len(), lines.join("\n"))
}

fn verification_message(checks: &[(&'static str, bool)]) -> String {
    let failed = checks
        .iter()
        .filter_map(|(actor_id, present)| (!present).then_some(*actor_id))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "seed verification failed".to_string()
    } else {
        format!("seed verification failed for: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use campusflow_db::SeededIdentity;

    use super::{seed_message, verification_message};

    #[test]
    fn verification_message_names_missing_identities() {
        let checks = [("adv-1", true), ("hod-1", false), ("warden-1", false)];

        assert_eq!(verification_message(&checks), "seed verification failed for: hod-1, warden-1");
    }

    #[test]
    fn verification_message_falls_back_when_nothing_is_flagged() {
        assert_eq!(verification_message(&[("adv-1", true)]), "seed verification failed");
    }

    #[test]
    fn seed_message_lists_role_actor_and_email() {
        let identities = [SeededIdentity {
            actor_id: "warden-1",
            email: "warden@college.edu",
            role: "warden",
        }];

        assert_eq!(
            seed_message(&identities),
            "seeded 1 identities:\n  - warden: warden-1 <warden@college.edu>"
        );
    }
}
