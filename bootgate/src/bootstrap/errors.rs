//! Bootstrap-phase errors. All of them are fatal to the bootstrap sequence.

use std::time::Duration;
use thiserror::Error as ThisError;

use crate::config::ConfigError;

/// SQLSTATE class 28: invalid authorization specification.
const AUTHORIZATION_CLASS: &str = "28";

/// Broad class of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// No handshake within the probe timeout
    Timeout,
    /// Network-level failure: refused, unreachable, name resolution
    Io,
    /// TLS negotiation failed
    Tls,
    /// The server rejected the credentials
    Authentication,
    /// The server returned some other error, e.g. the database does not exist
    Database,
    /// Malformed or unexpected protocol traffic
    Protocol,
    /// Invalid connection options
    Configuration,
    Other,
}

impl ConnectErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectErrorKind::Timeout => "Timeout",
            ConnectErrorKind::Io => "Io",
            ConnectErrorKind::Tls => "Tls",
            ConnectErrorKind::Authentication => "Authentication",
            ConnectErrorKind::Database => "Database",
            ConnectErrorKind::Protocol => "Protocol",
            ConnectErrorKind::Configuration => "Configuration",
            ConnectErrorKind::Other => "Other",
        }
    }
}

/// A connection to the database server could not be established.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConnectFailure {
    pub kind: ConnectErrorKind,
    pub message: String,
}

impl ConnectFailure {
    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ConnectErrorKind::Timeout,
            message: format!("no connection within {}", humantime::format_duration(after)),
        }
    }
}

impl From<&sqlx::Error> for ConnectFailure {
    fn from(err: &sqlx::Error) -> Self {
        let kind = match err {
            sqlx::Error::Io(_) => ConnectErrorKind::Io,
            sqlx::Error::Tls(_) => ConnectErrorKind::Tls,
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) if code.starts_with(AUTHORIZATION_CLASS) => ConnectErrorKind::Authentication,
                _ => ConnectErrorKind::Database,
            },
            sqlx::Error::Protocol(_) => ConnectErrorKind::Protocol,
            sqlx::Error::Configuration(_) => ConnectErrorKind::Configuration,
            sqlx::Error::PoolTimedOut => ConnectErrorKind::Timeout,
            _ => ConnectErrorKind::Other,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Provisioning did not produce the database.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionFailure {
    /// The requested name is not a usable PostgreSQL identifier
    #[error("invalid database name: {0}")]
    InvalidName(String),

    /// The administrative connection could not be opened
    #[error(transparent)]
    Connect(#[from] ConnectFailure),

    /// The server rejected the statement
    #[error("{message}")]
    Database { code: Option<String>, message: String },
}

impl From<&sqlx::Error> for ProvisionFailure {
    fn from(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => ProvisionFailure::Database {
                code: db_err.code().map(|c| c.into_owned()),
                message: db_err.message().to_string(),
            },
            // Anything else means the connection went away mid-statement
            other => ProvisionFailure::Connect(ConnectFailure::from(other)),
        }
    }
}

/// Any error that halts the bootstrap sequence.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectFailure),

    #[error(transparent)]
    Provision(#[from] ProvisionFailure),
}

impl Error {
    /// The error class, printed before the message in the one-line diagnostic.
    pub fn category(&self) -> String {
        match self {
            Error::Configuration(_) => "ConfigurationError".to_string(),
            Error::Connect(failure) | Error::Provision(ProvisionFailure::Connect(failure)) => {
                format!("ConnectFailure/{}", failure.kind.as_str())
            }
            Error::Provision(ProvisionFailure::InvalidName(_)) => "ProvisionFailure/InvalidName".to_string(),
            Error::Provision(ProvisionFailure::Database { code, .. }) => {
                format!("ProvisionFailure/{}", code.as_deref().unwrap_or("Database"))
            }
        }
    }

    /// `"{category}: {message}"`, the single line printed before a non-zero exit.
    pub fn diagnostic(&self) -> String {
        format!("{}: {}", self.category(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_io_kind() {
        let err = sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"));
        let failure = ConnectFailure::from(&err);
        assert_eq!(failure.kind, ConnectErrorKind::Io);
        assert!(failure.message.contains("connection refused"));
    }

    #[test]
    fn test_timeout_message() {
        let failure = ConnectFailure::timeout(Duration::from_millis(1500));
        assert_eq!(failure.kind, ConnectErrorKind::Timeout);
        assert_eq!(failure.message, "no connection within 1s 500ms");
    }

    #[test]
    fn test_diagnostics() {
        let err = Error::from(ConnectFailure::timeout(Duration::from_secs(1)));
        assert_eq!(err.diagnostic(), "ConnectFailure/Timeout: no connection within 1s");

        let err = Error::from(ProvisionFailure::Database {
            code: Some("42501".to_string()),
            message: "permission denied to create database".to_string(),
        });
        assert_eq!(err.diagnostic(), "ProvisionFailure/42501: permission denied to create database");

        let err = Error::from(ConfigError::Missing {
            key: "database.user",
            env: "POSTGRES_USER",
        });
        assert!(err.diagnostic().starts_with("ConfigurationError: missing required setting `database.user`"));
    }

    #[test]
    fn test_provision_connect_failure_keeps_connect_category() {
        let err = Error::from(ProvisionFailure::Connect(ConnectFailure {
            kind: ConnectErrorKind::Authentication,
            message: "password authentication failed for user \"app\"".to_string(),
        }));
        assert_eq!(err.category(), "ConnectFailure/Authentication");
    }
}
