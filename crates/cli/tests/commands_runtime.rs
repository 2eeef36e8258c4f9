use std::env;
use std::sync::{Mutex, OnceLock};

use campusflow_cli::commands::{migrate, seed, smoke, token};
use serde_json::Value;

const SECRET: &str = "cli-test-secret-cli-test-secret-0001";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CAMPUSFLOW_DATABASE_URL", "sqlite::memory:"), secret()], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_session_secret() {
    with_env(&[("CAMPUSFLOW_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("auth.session_secret"));
    });
}

#[test]
fn seed_lists_every_identity_and_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(&[("CAMPUSFLOW_DATABASE_URL", url.as_str()), secret()], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);
        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed success: {}", second.output);

        let first_payload = parse_payload(&first.output);
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);

        let message = first_payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("seeded 6 identities:"));
        assert!(message.contains("  - warden: warden-1 <warden@college.edu>"));
        assert!(message.contains("  - dept_incharge: incharge-hostel <hostel.incharge@college.edu>"));
    });
}

#[test]
fn token_is_issued_for_a_seeded_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(
        &[
            ("CAMPUSFLOW_DATABASE_URL", url.as_str()),
            secret(),
            ("CAMPUSFLOW_AUTH_ALLOWED_EMAIL_DOMAIN", "college.edu"),
        ],
        || {
            assert_eq!(seed::run().exit_code, 0);

            let result = token::run("Advisor.CSE@college.edu");
            assert_eq!(result.exit_code, 0, "expected token issue: {}", result.output);
            let payload = parse_payload(&result.output);
            let issued = payload["message"].as_str().unwrap_or_default();
            assert!(issued.starts_with("adv-1."), "token should bind the advisor: {issued}");
            assert_eq!(issued.split('.').count(), 3);

            let missing = token::run("nobody@college.edu");
            assert_eq!(missing.exit_code, 7);
            assert_eq!(parse_payload(&missing.output)["error_class"], "identity_not_found");
        },
    );
}

#[test]
fn smoke_walks_the_outpass_chain_with_valid_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = file_url(&dir);

    with_env(&[("CAMPUSFLOW_DATABASE_URL", url.as_str()), secret()], || {
        for _ in 0..2 {
            let result = smoke::run();
            assert_eq!(result.exit_code, 0, "expected successful smoke report: {}", result.output);

            let payload = parse_payload(last_line(&result.output));
            assert_eq!(payload["command"], "smoke");
            assert_eq!(payload["status"], "pass");
            assert_eq!(payload["checks"][3]["name"], "outpass_walkthrough");
            assert_eq!(payload["checks"][3]["status"], "pass");
        }
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
        assert_eq!(payload["checks"][3]["status"], "skipped");
    });
}

fn secret() -> (&'static str, &'static str) {
    ("CAMPUSFLOW_AUTH_SESSION_SECRET", SECRET)
}

fn file_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("campusflow.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "CAMPUSFLOW_DATABASE_URL",
        "CAMPUSFLOW_DATABASE_MAX_CONNECTIONS",
        "CAMPUSFLOW_DATABASE_TIMEOUT_SECS",
        "CAMPUSFLOW_SERVER_BIND_ADDRESS",
        "CAMPUSFLOW_SERVER_PORT",
        "CAMPUSFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CAMPUSFLOW_AUTH_SESSION_SECRET",
        "CAMPUSFLOW_AUTH_SESSION_TTL_SECS",
        "CAMPUSFLOW_AUTH_ALLOWED_EMAIL_DOMAIN",
        "CAMPUSFLOW_ATTACHMENTS_DIRECTORY",
        "CAMPUSFLOW_ATTACHMENTS_MAX_BYTES",
        "CAMPUSFLOW_ATTACHMENTS_ALLOWED_EXTENSIONS",
        "CAMPUSFLOW_ELIGIBILITY_DEPARTMENTS",
        "CAMPUSFLOW_ELIGIBILITY_YEARS_OF_STUDY",
        "CAMPUSFLOW_LOGGING_LEVEL",
        "CAMPUSFLOW_LOGGING_FORMAT",
        "CAMPUSFLOW_LOG_LEVEL",
        "CAMPUSFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
