use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::EligibilityPolicy;

pub const MIN_SESSION_SECRET_LEN: usize = 32;
pub const MIN_SESSION_TTL_SECS: u64 = 60;
/// Thirty days.
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub attachments: AttachmentConfig,
    pub eligibility: EligibilityPolicy,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub session_secret: SecretString,
    pub session_ttl_secs: u64,
    pub allowed_email_domain: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AttachmentConfig {
    pub directory: PathBuf,
    pub max_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub session_secret: Option<String>,
    pub attachments_directory: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://campusflow.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            auth: AuthConfig {
                session_secret: String::new().into(),
                session_ttl_secs: 8 * 60 * 60,
                allowed_email_domain: None,
            },
            attachments: AttachmentConfig {
                directory: PathBuf::from("attachments"),
                max_bytes: 5 * 1024 * 1024,
                allowed_extensions: ["pdf", "jpg", "jpeg", "png"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            },
            eligibility: EligibilityPolicy::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("campusflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(session_secret_value) = auth.session_secret {
                self.auth.session_secret = secret_value(session_secret_value);
            }
            if let Some(session_ttl_secs) = auth.session_ttl_secs {
                self.auth.session_ttl_secs = session_ttl_secs;
            }
            if let Some(allowed_email_domain) = auth.allowed_email_domain {
                self.auth.allowed_email_domain = Some(allowed_email_domain);
            }
        }

        if let Some(attachments) = patch.attachments {
            if let Some(directory) = attachments.directory {
                self.attachments.directory = directory;
            }
            if let Some(max_bytes) = attachments.max_bytes {
                self.attachments.max_bytes = max_bytes;
            }
            if let Some(allowed_extensions) = attachments.allowed_extensions {
                self.attachments.allowed_extensions = normalize_extensions(allowed_extensions);
            }
        }

        if let Some(eligibility) = patch.eligibility {
            if let Some(departments) = eligibility.departments {
                self.eligibility.departments = departments;
            }
            if let Some(years_of_study) = eligibility.years_of_study {
                self.eligibility.years_of_study = years_of_study;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CAMPUSFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CAMPUSFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CAMPUSFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CAMPUSFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CAMPUSFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CAMPUSFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CAMPUSFLOW_SERVER_PORT") {
            self.server.port = parse_u16("CAMPUSFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CAMPUSFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CAMPUSFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CAMPUSFLOW_AUTH_SESSION_SECRET") {
            self.auth.session_secret = secret_value(value);
        }
        if let Some(value) = read_env("CAMPUSFLOW_AUTH_SESSION_TTL_SECS") {
            self.auth.session_ttl_secs = parse_u64("CAMPUSFLOW_AUTH_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CAMPUSFLOW_AUTH_ALLOWED_EMAIL_DOMAIN") {
            self.auth.allowed_email_domain = Some(value);
        }

        if let Some(value) = read_env("CAMPUSFLOW_ATTACHMENTS_DIRECTORY") {
            self.attachments.directory = PathBuf::from(value);
        }
        if let Some(value) = read_env("CAMPUSFLOW_ATTACHMENTS_MAX_BYTES") {
            self.attachments.max_bytes = parse_u64("CAMPUSFLOW_ATTACHMENTS_MAX_BYTES", &value)?;
        }
        if let Some(value) = read_env("CAMPUSFLOW_ATTACHMENTS_ALLOWED_EXTENSIONS") {
            self.attachments.allowed_extensions = normalize_extensions(split_list(&value));
        }

        if let Some(value) = read_env("CAMPUSFLOW_ELIGIBILITY_DEPARTMENTS") {
            self.eligibility.departments = split_list(&value);
        }
        if let Some(value) = read_env("CAMPUSFLOW_ELIGIBILITY_YEARS_OF_STUDY") {
            self.eligibility.years_of_study = split_list(&value)
                .iter()
                .map(|year| parse_u8("CAMPUSFLOW_ELIGIBILITY_YEARS_OF_STUDY", year))
                .collect::<Result<_, _>>()?;
        }

        let log_level =
            read_env("CAMPUSFLOW_LOGGING_LEVEL").or_else(|| read_env("CAMPUSFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CAMPUSFLOW_LOGGING_FORMAT").or_else(|| read_env("CAMPUSFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(session_secret) = overrides.session_secret {
            self.auth.session_secret = secret_value(session_secret);
        }
        if let Some(directory) = overrides.attachments_directory {
            self.attachments.directory = directory;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_attachments(&self.attachments)?;
        validate_eligibility(&self.eligibility)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("campusflow.toml"), PathBuf::from("config/campusflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.session_secret.expose_secret();
    if secret.is_empty() {
        return Err(ConfigError::Validation(
            "auth.session_secret is required. Generate one with `openssl rand -hex 32` and set CAMPUSFLOW_AUTH_SESSION_SECRET".to_string(),
        ));
    }
    if secret.len() < MIN_SESSION_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "auth.session_secret must be at least {MIN_SESSION_SECRET_LEN} characters (got {})",
            secret.len()
        )));
    }

    if !(MIN_SESSION_TTL_SECS..=MAX_SESSION_TTL_SECS).contains(&auth.session_ttl_secs) {
        return Err(ConfigError::Validation(format!(
            "auth.session_ttl_secs must be between {MIN_SESSION_TTL_SECS} and {MAX_SESSION_TTL_SECS} (got {})",
            auth.session_ttl_secs
        )));
    }

    if let Some(domain) = &auth.allowed_email_domain {
        let domain = domain.trim().trim_start_matches('@');
        if domain.is_empty() || !domain.contains('.') {
            return Err(ConfigError::Validation(
                "auth.allowed_email_domain must be a domain such as `college.edu`".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_attachments(attachments: &AttachmentConfig) -> Result<(), ConfigError> {
    if attachments.directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "attachments.directory must not be empty".to_string(),
        ));
    }

    if attachments.max_bytes == 0 {
        return Err(ConfigError::Validation(
            "attachments.max_bytes must be greater than zero".to_string(),
        ));
    }

    if attachments.allowed_extensions.is_empty() {
        return Err(ConfigError::Validation(
            "attachments.allowed_extensions must list at least one extension".to_string(),
        ));
    }

    Ok(())
}

fn validate_eligibility(eligibility: &EligibilityPolicy) -> Result<(), ConfigError> {
    if let Some(year) = eligibility.years_of_study.iter().find(|year| !(1..=6).contains(*year)) {
        return Err(ConfigError::Validation(format!(
            "eligibility.years_of_study contains `{year}`; years must be in range 1..=6"
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|extension| extension.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|extension| !extension.is_empty())
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    attachments: Option<AttachmentPatch>,
    eligibility: Option<EligibilityPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    session_secret: Option<String>,
    session_ttl_secs: Option<u64>,
    allowed_email_domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentPatch {
    directory: Option<PathBuf>,
    max_bytes: Option<u64>,
    allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct EligibilityPatch {
    departments: Option<Vec<String>>,
    years_of_study: Option<Vec<u8>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
