//! Application configuration management.
//!
//! Configuration is assembled once at process start and handed to each component by reference.
//! Nothing below `main` reads the environment on its own.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Optional base configuration (default: `bootgate.yaml`)
//! 2. **Environment variables** - Variables prefixed with `BOOTGATE_` override YAML values
//! 3. **Bootstrap variables** - The unprefixed variables used by container bootstrap scripts
//!    (`DB_ENGINE`, `DATABASE_HOST`, `POSTGRES_USER`, `POSTGRES_PASSWORD`, `POSTGRES_DB`,
//!    `APP_DB_NAME`) override the matching `database.*` fields
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `BOOTGATE_AUTH__SESSION__COOKIE_SECURE=false` sets `auth.session.cookie_secure`.
//!
//! ## Required Settings
//!
//! Every `database.*` field is required. A missing or empty value is a
//! [`ConfigError::Missing`], and the process exits before any connection is attempted.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! DB_ENGINE=postgresql+psycopg2
//! DATABASE_HOST=db:5432
//! POSTGRES_USER=app
//! POSTGRES_PASSWORD=secret
//! POSTGRES_DB=postgres
//! APP_DB_NAME=reports
//!
//! BOOTGATE_SECRET_KEY=change-me
//! BOOTGATE_PORT=8088
//! BOOTGATE_AUTH__UNVERIFIED_IDENTITY_GRANT__ENABLED=false
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error as ThisError;

use crate::bootstrap::target::{ConnectionTarget, Engine};

/// Unprefixed bootstrap environment variables and the `database.*` field each one sets.
pub const BOOTSTRAP_ENV: [(&str, &str); 6] = [
    ("DB_ENGINE", "database.engine"),
    ("DATABASE_HOST", "database.host"),
    ("POSTGRES_USER", "database.user"),
    ("POSTGRES_PASSWORD", "database.password"),
    ("POSTGRES_DB", "database.admin_database"),
    ("APP_DB_NAME", "database.app_database"),
];

/// Routes registered by the console itself; `index_path` may not shadow them.
const RESERVED_PATHS: [&str; 5] = ["/login", "/login/", "/logout", "/secret", "/healthz"];

/// Characters axum treats as route syntax (captures, wildcards, legacy `:param`), plus the URL
/// query and fragment delimiters. `index_path` is registered as a literal route.
const ROUTE_SYNTAX_CHARS: [char; 6] = ['{', '}', '*', ':', '?', '#'];

/// CLI args: config file location plus the bootstrap step to run
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "BOOTGATE_CONFIG", default_value = "bootgate.yaml")]
    pub config: String,

    /// Validate configuration and exit without running anything.
    #[arg(long)]
    pub validate: bool,

    /// Step to run. Defaults to `serve`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Attempt a single connection to the administrative database
    Probe,
    /// Re-run the probe until it succeeds or the deadline passes
    Wait {
        /// Give up after this long
        #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
        deadline: Duration,
        /// Pause between attempts
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        interval: Duration,
    },
    /// Create the application database if it does not exist
    Provision,
    /// Serve the console
    Serve,
}

/// Errors raised while assembling configuration.
#[derive(ThisError, Debug)]
pub enum ConfigError {
    /// A required setting was not supplied
    #[error("missing required setting `{key}` (set {env} or BOOTGATE_{})", .key.replace('.', "__").to_uppercase())]
    Missing { key: &'static str, env: &'static str },

    /// A setting was supplied but is unusable
    #[error("{0}")]
    Invalid(String),

    /// The configuration sources could not be read or deserialized
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),
}

/// Main application configuration.
///
/// All fields except `database.*` have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL where the console is reachable by browsers. Used in the startup access hint.
    pub public_url: String,
    /// Database server connection settings shared by the probe, provisioner and server
    pub database: DatabaseConfig,
    /// Application database pool settings (serve mode only)
    pub pool: PoolSettings,
    /// Readiness probe settings
    pub probe: ProbeConfig,
    /// Username of the console administrator ensured on startup
    pub admin_username: String,
    /// Password for the administrator. When unset, an existing password is left untouched.
    pub admin_password: Option<String>,
    /// Secret key for session signing (required to serve)
    pub secret_key: Option<String>,
    /// Where to send users after a login when no redirect target is given
    pub index_path: String,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Database server settings. Every field is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Engine identifier, e.g. `postgres` or `postgresql+psycopg2`
    pub engine: Option<String>,
    /// Server address, `host` or `host:port`
    pub host: Option<String>,
    /// Administrative user
    pub user: Option<String>,
    /// Administrative password
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Database to connect to for probing and provisioning (it must already exist)
    pub admin_database: Option<String>,
    /// Database to provision and serve the console from
    pub app_database: Option<String>,
}

impl DatabaseConfig {
    fn require<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
        let env = BOOTSTRAP_ENV
            .iter()
            .find(|(_, field)| *field == key)
            .map(|(env, _)| *env)
            .unwrap_or(key);
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ConfigError::Missing { key, env }),
        }
    }

    /// Build the immutable connection target, failing on the first missing or invalid field.
    pub fn connection_target(&self) -> Result<ConnectionTarget, ConfigError> {
        let engine: Engine = Self::require(&self.engine, "database.engine")?.parse()?;
        let host = Self::require(&self.host, "database.host")?;
        let user = Self::require(&self.user, "database.user")?;
        // Passwords are taken verbatim; only absence is an error
        let password = match self.password.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => {
                return Err(ConfigError::Missing {
                    key: "database.password",
                    env: "POSTGRES_PASSWORD",
                });
            }
        };
        let admin_database = Self::require(&self.admin_database, "database.admin_database")?;
        let app_database = Self::require(&self.app_database, "database.app_database")?;

        ConnectionTarget::new(engine, host, user, password, admin_database, app_database)
    }
}

/// Pool parameters for the application database connection pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600, // 10 minutes
        }
    }
}

/// Readiness probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Connection handshake timeout for a single probe attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Session cookie configuration
    pub session: SessionConfig,
    /// Argon2 parameters used when hashing the administrator password
    pub password: PasswordConfig,
    /// The `/secret` route that grants a session from a bare username
    pub unverified_identity_grant: IdentityGrantConfig,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Session lifetime; also the JWT expiry
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            cookie_name: "bootgate_session".to_string(),
            cookie_secure: true,
            // Lax so the cookie survives the top-level redirect out of /secret
            cookie_same_site: "lax".to_string(),
        }
    }
}

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// Argon2 memory cost in KiB (default: 19456 KiB = 19 MB)
    pub argon2_memory_kib: u32,
    /// Argon2 iterations (default: 2)
    pub argon2_iterations: u32,
    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            argon2_memory_kib: 19456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

/// Unverified-identity session grant.
///
/// When enabled, anyone who can reach `/secret` can become any existing user by naming them.
/// Only enable this for controlled bootstrap or demo deployments.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityGrantConfig {
    pub enabled: bool,
}

impl Default for IdentityGrantConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
            public_url: "http://localhost:8088".to_string(),
            database: DatabaseConfig::default(),
            pool: PoolSettings::default(),
            probe: ProbeConfig::default(),
            admin_username: "superadmin".to_string(),
            admin_password: None,
            secret_key: None,
            index_path: "/".to_string(),
            auth: AuthConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment, then validate it.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config: Self = Self::figment(args).extract().map_err(Box::new)?;

        // Bootstrap variables are taken verbatim rather than through figment's value parsing,
        // which would turn a numeric password like "0123" into the integer 123.
        // An empty variable counts as unset.
        for (var, key) in BOOTSTRAP_ENV {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                config.database.set(key, value);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file (missing file is fine)
            .merge(Yaml::file(&args.config))
            // Prefixed environment variables override specific values
            .merge(Env::prefixed("BOOTGATE_").split("__").ignore(&["CONFIG"]))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.connection_target()?;

        if self.probe.timeout.is_zero() {
            return Err(ConfigError::Invalid("probe.timeout must be greater than zero".to_string()));
        }

        if !self.index_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "index_path must be an absolute path, got '{}'",
                self.index_path
            )));
        }

        if self.index_path.contains(ROUTE_SYNTAX_CHARS) {
            return Err(ConfigError::Invalid(format!(
                "index_path '{}' must be a literal path without any of {:?}",
                self.index_path, ROUTE_SYNTAX_CHARS
            )));
        }

        if RESERVED_PATHS.contains(&self.index_path.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "index_path '{}' is already used by a built-in route",
                self.index_path
            )));
        }

        if self.admin_username.trim().is_empty() {
            return Err(ConfigError::Invalid("admin_username cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Extra requirements that only apply when serving HTTP.
    pub fn validate_for_serving(&self) -> Result<(), ConfigError> {
        match self.secret_key.as_deref() {
            Some(key) if !key.is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "secret_key is required to sign sessions. \
                     Set BOOTGATE_SECRET_KEY or add secret_key to the config file."
                        .to_string(),
                ));
            }
        }

        if self.auth.session.timeout.as_secs() < 300 {
            return Err(ConfigError::Invalid(
                "auth.session.timeout is too short (minimum 5 minutes)".to_string(),
            ));
        }

        if !["strict", "lax", "none"].contains(&self.auth.session.cookie_same_site.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "auth.session.cookie_same_site must be strict, lax or none, got '{}'",
                self.auth.session.cookie_same_site
            )));
        }

        Ok(())
    }

    /// The connection target. Only fails if called on an unvalidated config.
    pub fn connection_target(&self) -> Result<ConnectionTarget, ConfigError> {
        self.database.connection_target()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    fn set(&mut self, key: &str, value: String) {
        let slot = match key {
            "database.engine" => &mut self.engine,
            "database.host" => &mut self.host,
            "database.user" => &mut self.user,
            "database.password" => &mut self.password,
            "database.admin_database" => &mut self.admin_database,
            "database.app_database" => &mut self.app_database,
            _ => return,
        };
        *slot = Some(value);
    }
}
