//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables. Nested
//! sections use `__` as separator, e.g. `QUEUE__MAX_TRIES=8`.

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use vo_federation_identity::{SessionPolicy, VerificationConfig};
use vo_federation_sharing::QueueConfig;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Public base URL of this instance, e.g. `https://cloud.example`.
    pub public_url: String,

    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Page the browser lands on after a login, relative to `public_url`.
    #[serde(default = "default_completion_path")]
    pub completion_path: String,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Header the fronting host sets to the authenticated local user id.
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Local users allowed to manage providers and the share queue.
    #[serde(default)]
    pub admin_users: Vec<String>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub jwt: JwtConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub queue: QueueSettings,
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// ID token verification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Clock-skew leeway for `exp`, `nbf` and `iat`.
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,

    /// Comma-separated algorithm names. Empty allows every supported one.
    #[serde(default)]
    pub algorithms: String,
}

/// Session settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Replace the stored refresh token when a refresh returns a new one.
    #[serde(default)]
    pub rotate_refresh_token: bool,
}

/// Share notification queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default = "default_max_tries")]
    pub max_tries: i32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_completion_path() -> String {
    "/settings/user/vo_federation".to_string()
}

fn default_secure_cookies() -> bool {
    true
}

fn default_user_header() -> String {
    "x-remote-user".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_leeway_seconds() -> u64 {
    vo_federation_identity::token::DEFAULT_LEEWAY_SECONDS
}

fn default_queue_interval_seconds() -> u64 {
    30
}

fn default_max_tries() -> i32 {
    5
}

fn default_batch_size() -> usize {
    100
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            leeway_seconds: default_leeway_seconds(),
            algorithms: String::new(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            interval_seconds: default_queue_interval_seconds(),
            max_tries: default_max_tries(),
            batch_size: default_batch_size(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl JwtConfig {
    /// Builds the verification config.
    ///
    /// # Errors
    ///
    /// Returns the first algorithm name jsonwebtoken does not know.
    pub fn verification(&self) -> Result<VerificationConfig, String> {
        let names: Vec<&str> = self
            .algorithms
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            let all = VerificationConfig::default().allowed_algorithms().to_vec();
            return Ok(VerificationConfig::new(self.leeway_seconds, all));
        }

        let algorithms = names
            .into_iter()
            .map(|name| Algorithm::from_str(name).map_err(|_| name.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VerificationConfig::new(self.leeway_seconds, algorithms))
    }
}

impl SessionConfig {
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            rotate_refresh_token: self.rotate_refresh_token,
        }
    }
}

impl QueueSettings {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            interval: Duration::from_secs(self.interval_seconds),
            max_tries: self.max_tries,
            batch_size: self.batch_size,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("admin_users")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Absolute URL of the OIDC callback route.
    pub fn redirect_uri(&self) -> String {
        format!("{}/code", self.public_url.trim_end_matches('/'))
    }

    /// Absolute URL of the page shown after a login.
    pub fn completion_url(&self) -> String {
        format!(
            "{}{}",
            self.public_url.trim_end_matches('/'),
            self.completion_path
        )
    }

    pub fn is_admin(&self, uid: &str) -> bool {
        self.admin_users.iter().any(|admin| admin == uid)
    }
}
