//! Where the bootstrap steps and the server connect to.

use sqlx::postgres::PgConnectOptions;
use std::{fmt, str::FromStr};
use url::Url;

use crate::bootstrap::provision::quote_identifier;
use crate::config::ConfigError;

pub const DEFAULT_PORT: u16 = 5432;

/// Database engine identifier, e.g. `postgres` or `postgresql+psycopg2`.
///
/// Only the PostgreSQL dialect is supported; a driver suffix after `+` is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine(String);

impl Engine {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dialect part, without any driver suffix.
    pub fn dialect(&self) -> &str {
        self.0.split('+').next().unwrap_or(&self.0)
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let dialect = s.split('+').next().unwrap_or_default().to_ascii_lowercase();
        match dialect.as_str() {
            "postgres" | "postgresql" => Ok(Self(s.to_ascii_lowercase())),
            _ => Err(ConfigError::Invalid(format!(
                "unsupported database engine '{s}': only postgres/postgresql is supported"
            ))),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable connection settings for one database server.
///
/// Built once from configuration. The same server hosts the administrative database (used by the
/// probe and the provisioner) and the application database (provisioned, then served from).
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    engine: Engine,
    host: String,
    port: u16,
    user: String,
    password: String,
    admin_database: String,
    app_database: String,
}

impl ConnectionTarget {
    pub fn new(
        engine: Engine,
        address: &str,
        user: &str,
        password: &str,
        admin_database: &str,
        app_database: &str,
    ) -> Result<Self, ConfigError> {
        let (host, port) = split_host_port(address)?;
        quote_identifier(app_database).map_err(|e| ConfigError::Invalid(format!("database.app_database: {e}")))?;

        Ok(Self {
            engine,
            host,
            port,
            user: user.to_string(),
            password: password.to_string(),
            admin_database: admin_database.to_string(),
            app_database: app_database.to_string(),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn admin_database(&self) -> &str {
        &self.admin_database
    }

    pub fn app_database(&self) -> &str {
        &self.app_database
    }

    /// Same server and user with a different password.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    /// Connection options for `database` on this server.
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(database)
            .application_name("bootgate")
    }

    /// Options for the administrative database, which must already exist.
    pub fn admin_options(&self) -> PgConnectOptions {
        self.connect_options(&self.admin_database)
    }

    /// Options for the application database, valid once it has been provisioned.
    pub fn app_options(&self) -> PgConnectOptions {
        self.connect_options(&self.app_database)
    }

    /// Connection URL for `database`, credentials included and percent-encoded.
    ///
    /// Fails for hosts that cannot appear in a URL, such as Unix socket directories.
    pub fn url(&self, database: &str) -> Result<Url, url::ParseError> {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let mut url = Url::parse(&format!("{}://{}:{}", self.engine.dialect(), host, self.port))?;
        // Both setters only fail for cannot-be-a-base URLs, which a parsed host rules out
        let _ = url.set_username(&self.user);
        let _ = url.set_password(Some(&self.password));
        url.set_path(database);
        Ok(url)
    }

    /// URL for `database` with the password masked, safe to log.
    pub fn redacted_url(&self, database: &str) -> String {
        match self.url(database) {
            Ok(mut url) => {
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            Err(_) => format!(
                "{}://{}:***@{}:{}/{}",
                self.engine.dialect(),
                self.user,
                self.host,
                self.port,
                database
            ),
        }
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("admin_database", &self.admin_database)
            .field("app_database", &self.app_database)
            .finish()
    }
}

/// Split `host`, `host:port`, `[v6]` or `[v6]:port`. A bare IPv6 address keeps the default port.
fn split_host_port(address: &str) -> Result<(String, u16), ConfigError> {
    let address = address.trim();
    let invalid_port = |p: &str| ConfigError::Invalid(format!("database.host: invalid port '{p}' in '{address}'"));

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ConfigError::Invalid(format!("database.host: unterminated '[' in '{address}'")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| invalid_port(p))?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(invalid_port(tail)),
        };
        return Ok((host.to_string(), port));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            if host.is_empty() {
                return Err(ConfigError::Invalid(format!("database.host: missing host in '{address}'")));
            }
            Ok((host.to_string(), port.parse().map_err(|_| invalid_port(port))?))
        }
        _ => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(address: &str) -> ConnectionTarget {
        ConnectionTarget::new("postgres".parse().unwrap(), address, "app", "p@ss:word/", "postgres", "reports").unwrap()
    }

    #[test]
    fn test_engine_parsing() {
        assert_eq!("postgres".parse::<Engine>().unwrap().dialect(), "postgres");
        assert_eq!("PostgreSQL".parse::<Engine>().unwrap().dialect(), "postgresql");

        let psycopg: Engine = "postgresql+psycopg2".parse().unwrap();
        assert_eq!(psycopg.as_str(), "postgresql+psycopg2");
        assert_eq!(psycopg.dialect(), "postgresql");

        assert!("mysql".parse::<Engine>().is_err());
        assert!("sqlite+pysqlite".parse::<Engine>().is_err());
        assert!("".parse::<Engine>().is_err());
    }

    #[test]
    fn test_host_and_port_forms() {
        assert_eq!(split_host_port("db").unwrap(), ("db".to_string(), 5432));
        assert_eq!(split_host_port("db:6543").unwrap(), ("db".to_string(), 6543));
        assert_eq!(split_host_port("10.0.0.7:5433").unwrap(), ("10.0.0.7".to_string(), 5433));
        assert_eq!(split_host_port("[::1]:5433").unwrap(), ("::1".to_string(), 5433));
        assert_eq!(split_host_port("[::1]").unwrap(), ("::1".to_string(), 5432));
        assert_eq!(split_host_port("::1").unwrap(), ("::1".to_string(), 5432));
        assert_eq!(
            split_host_port("/var/run/postgresql").unwrap(),
            ("/var/run/postgresql".to_string(), 5432)
        );

        assert!(split_host_port("db:notaport").is_err());
        assert!(split_host_port("db:70000").is_err());
        assert!(split_host_port(":5432").is_err());
        assert!(split_host_port("[::1").is_err());
    }

    #[test]
    fn test_url_encodes_credentials() {
        let url = target("db:6543").url("reports").unwrap();
        assert_eq!(url.scheme(), "postgres");
        assert_eq!(url.host_str(), Some("db"));
        assert_eq!(url.port(), Some(6543));
        assert_eq!(url.username(), "app");
        assert_eq!(url.password(), Some("p%40ss%3Aword%2F"));
        assert_eq!(url.path(), "/reports");
    }

    #[test]
    fn test_redacted_url_hides_password() {
        let t = target("db");
        let redacted = t.redacted_url(t.app_database());
        assert!(redacted.contains("***"));
        assert!(!redacted.contains("p%40ss"));
        assert!(redacted.ends_with("/reports"));

        let debug = format!("{t:?}");
        assert!(!debug.contains("p@ss"));
    }

    #[test]
    fn test_invalid_app_database_rejected() {
        let result = ConnectionTarget::new("postgres".parse().unwrap(), "db", "app", "pw", "postgres", &"x".repeat(64));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
