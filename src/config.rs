use crate::{errors::Result, server::FORCE_CLOSE_GRACE};
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use validator::{Validate, ValidationError};

/// Selects the active profile, e.g. `local`, `development`, `production`.
pub const PROFILE_VAR: &str = "APP_ENV";
/// Overrides the directory holding the `env.<profile>.yaml` files.
pub const CONFIG_DIR_VAR: &str = "APP_CONFIG_DIR";
/// Prefix of environment overrides: `APP__SERVER__PORT=9090` sets `server.port`.
pub const ENV_OVERRIDE_PREFIX: &str = "APP";

pub const DEFAULT_PROFILE: &str = "local";
pub const PRODUCTION_PROFILE: &str = "production";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Profile(name.into())
    }

    /// Reads `APP_ENV`, falling back to `local` when unset or blank.
    pub fn from_env() -> Self {
        match env::var(PROFILE_VAR) {
            Ok(name) if !name.trim().is_empty() => Profile(name.trim().to_string()),
            _ => Profile(DEFAULT_PROFILE.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        self.0 == PRODUCTION_PROFILE
    }

    pub fn file_name(&self) -> String {
        format!("env.{}.yaml", self.0)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile(DEFAULT_PROFILE.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub jwt_auth: JwtAuthConfig,
    #[serde(default)]
    #[validate(nested)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub s3: S3Config,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_shutdown_deadlines"))]
pub struct ServerConfig {
    #[serde(default)]
    pub env: String,
    #[serde(default = "default_host")]
    #[validate(length(min = 1, message = "server.host must not be empty"))]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    #[validate(nested)]
    pub tls: TlsConfig,
    /// Time allowed for in-flight requests to drain before connections are force closed.
    #[serde(default = "default_shutdown_timeout_secs")]
    #[validate(range(min = 1, message = "server.shutdown_timeout_secs must be at least 1"))]
    pub shutdown_timeout_secs: u64,
    /// Upper bound for the whole shutdown sequence, listener and resources included.
    /// Must leave room for the drain timeout plus the forced close grace period.
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_tls_paths"))]
pub struct TlsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub ssl_mode: String,
    #[serde(default)]
    pub max_open_conns: u32,
    #[serde(default)]
    pub max_idle_conns: u32,
    #[serde(default)]
    pub conn_max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtAuthConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub access_token_exp_secs: u64,
    #[serde(default)]
    pub refresh_token_exp_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_rate_limit"))]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub period_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Config {}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_shutdown_deadline_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: String::new(),
            host: default_host(),
            port: default_port(),
            tls: TlsConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            shutdown_deadline_secs: default_shutdown_deadline_secs(),
        }
    }
}

fn validate_shutdown_deadlines(server: &ServerConfig) -> Result<(), ValidationError> {
    let forced_close_secs = server
        .shutdown_timeout_secs
        .saturating_add(FORCE_CLOSE_GRACE.as_secs());

    if server.shutdown_deadline_secs <= forced_close_secs {
        return Err(ValidationError::new("shutdown_deadline_too_short").with_message(
            format!(
                "server.shutdown_deadline_secs must exceed server.shutdown_timeout_secs by more than {}s",
                FORCE_CLOSE_GRACE.as_secs()
            )
            .into(),
        ));
    }
    Ok(())
}

fn validate_tls_paths(tls: &TlsConfig) -> Result<(), ValidationError> {
    let missing = |path: &Option<String>| path.as_deref().is_none_or(|p| p.trim().is_empty());

    if tls.enable && (missing(&tls.cert_file) || missing(&tls.key_file)) {
        return Err(ValidationError::new("tls_paths_missing")
            .with_message("server.tls.cert_file and server.tls.key_file are required".into()));
    }
    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ValidationError> {
    if rate_limit.enable && (rate_limit.limit == 0 || rate_limit.period_secs == 0) {
        return Err(ValidationError::new("rate_limit_invalid")
            .with_message("rate_limit.limit and rate_limit.period_secs must be positive".into()));
    }
    Ok(())
}

impl Config {
    /// Loads `env.<profile>.yaml` from `dir`, then applies `APP__*` environment overrides.
    pub fn load(dir: impl AsRef<Path>, profile: &Profile) -> Result<Self> {
        let path = dir.as_ref().join(profile.file_name());

        let settings = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(
                Environment::with_prefix(ENV_OVERRIDE_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        if config.server.env.trim().is_empty() {
            config.server.env = profile.name().to_string();
        }
        config.validate()?;

        Ok(config)
    }

    /// Loads the profile named by `APP_ENV` from `APP_CONFIG_DIR`, or `./configs`.
    pub fn from_env() -> Result<Self> {
        let dir = match env::var_os(CONFIG_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir()
                .map_err(|e| config::ConfigError::Foreign(Box::new(e)))?
                .join("configs"),
        };

        Self::load(dir, &Profile::from_env())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn is_production(&self) -> bool {
        self.server.env == PRODUCTION_PROFILE
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.server.tls.enable.then_some(&self.server.tls)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_deadline_secs)
    }
}
