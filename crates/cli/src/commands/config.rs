use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use campusflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let session_secret = redact_secret(config.auth.session_secret.expose_secret());
    let extensions = config.attachments.allowed_extensions.join(",");
    let departments = if config.eligibility.departments.is_empty() {
        "<any>".to_string()
    } else {
        config.eligibility.departments.join(",")
    };
    let years = config
        .eligibility
        .years_of_study
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "CAMPUSFLOW_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "CAMPUSFLOW_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "CAMPUSFLOW_DATABASE_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "CAMPUSFLOW_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "CAMPUSFLOW_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "CAMPUSFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("auth.session_secret", session_secret, "CAMPUSFLOW_AUTH_SESSION_SECRET"),
        (
            "auth.session_ttl_secs",
            config.auth.session_ttl_secs.to_string(),
            "CAMPUSFLOW_AUTH_SESSION_TTL_SECS",
        ),
        (
            "auth.allowed_email_domain",
            config.auth.allowed_email_domain.clone().unwrap_or_else(|| "<unset>".to_string()),
            "CAMPUSFLOW_AUTH_ALLOWED_EMAIL_DOMAIN",
        ),
        (
            "attachments.directory",
            config.attachments.directory.display().to_string(),
            "CAMPUSFLOW_ATTACHMENTS_DIRECTORY",
        ),
        (
            "attachments.max_bytes",
            config.attachments.max_bytes.to_string(),
            "CAMPUSFLOW_ATTACHMENTS_MAX_BYTES",
        ),
        ("attachments.allowed_extensions", extensions, "CAMPUSFLOW_ATTACHMENTS_ALLOWED_EXTENSIONS"),
        ("eligibility.departments", departments, "CAMPUSFLOW_ELIGIBILITY_DEPARTMENTS"),
        ("eligibility.years_of_study", years, "CAMPUSFLOW_ELIGIBILITY_YEARS_OF_STUDY"),
        ("logging.level", config.logging.level.clone(), "CAMPUSFLOW_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "CAMPUSFLOW_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        let source = field_source(
            key,
            Some(env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("campusflow.toml"), PathBuf::from("config/campusflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows length only; never any characters of the secret.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} chars>", trimmed.len())
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source, redact_secret};

    #[test]
    fn redaction_reveals_only_length() {
        assert_eq!(redact_secret(""), "<empty>");
        assert_eq!(redact_secret("abcdefgh"), "<redacted, 8 chars>");
    }

    #[test]
    fn file_source_is_reported_for_nested_keys() {
        let doc: Value = "[auth]\nsession_ttl_secs = 600\n".parse().expect("valid toml");

        assert!(contains_path(&doc, "auth.session_ttl_secs"));
        assert!(!contains_path(&doc, "auth.allowed_email_domain"));
        assert_eq!(
            field_source("auth.session_ttl_secs", None, Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(field_source("server.port", None, Some(&doc), None), "default");
    }
}
