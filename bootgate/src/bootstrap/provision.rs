//! Idempotent creation of the application database.

use sqlx::{Connection, PgConnection};
use tracing::{debug, error, info, instrument, warn};

use crate::bootstrap::{
    errors::{ConnectFailure, ProvisionFailure},
    target::ConnectionTarget,
};

/// SQLSTATE duplicate_database
const DUPLICATE_DATABASE: &str = "42P04";
/// SQLSTATE unique_violation, raised instead of 42P04 when two creates race
const UNIQUE_VIOLATION: &str = "23505";
const DATABASE_NAME_INDEX: &str = "pg_database_datname_index";
/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1 bytes
const MAX_IDENTIFIER_LEN: usize = 63;

/// Result of a provisioning attempt. Produced once per bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The database was created by this call
    Ready,
    /// The database was already there; callers proceed as if it had just been created
    AlreadyExists,
    /// Anything else
    Failed(ProvisionFailure),
}

impl ProvisionOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ProvisionOutcome::Failed(_))
    }

    /// `AlreadyExists` counts as success.
    pub fn into_result(self) -> Result<(), ProvisionFailure> {
        match self {
            ProvisionOutcome::Ready | ProvisionOutcome::AlreadyExists => Ok(()),
            ProvisionOutcome::Failed(failure) => Err(failure),
        }
    }
}

/// Double-quote `name` as a PostgreSQL identifier.
///
/// Quoting keeps the name's case, so the database is created under exactly the name the server
/// later connects to.
pub fn quote_identifier(name: &str) -> Result<String, ProvisionFailure> {
    if name.is_empty() {
        return Err(ProvisionFailure::InvalidName("name is empty".to_string()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ProvisionFailure::InvalidName(format!(
            "'{name}' is longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if name.contains('\0') {
        return Err(ProvisionFailure::InvalidName("name contains a NUL byte".to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn is_duplicate_database(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some(DUPLICATE_DATABASE) => true,
            Some(UNIQUE_VIOLATION) => db_err.constraint() == Some(DATABASE_NAME_INDEX),
            _ => false,
        },
        _ => false,
    }
}

/// Create `db_name` on the target server.
///
/// Connects to the administrative database (the new one does not exist yet) and issues
/// `CREATE DATABASE` through the simple query protocol, so it runs in auto-commit mode rather
/// than inside a transaction. The connection is closed before returning on every path.
#[instrument(skip(target), fields(host = %target.host(), admin_database = %target.admin_database()))]
pub async fn provision(target: &ConnectionTarget, db_name: &str) -> ProvisionOutcome {
    let statement = match quote_identifier(db_name) {
        Ok(quoted) => format!("CREATE DATABASE {quoted}"),
        Err(failure) => return ProvisionOutcome::Failed(failure),
    };

    let mut conn = match PgConnection::connect_with(&target.admin_options()).await {
        Ok(conn) => conn,
        Err(e) => {
            let failure = ConnectFailure::from(&e);
            error!(kind = failure.kind.as_str(), "Could not connect to provision database: {}", failure);
            return ProvisionOutcome::Failed(ProvisionFailure::Connect(failure));
        }
    };

    let result = sqlx::raw_sql(&statement).execute(&mut conn).await;

    if let Err(e) = conn.close().await {
        debug!("Error closing provisioning connection: {}", e);
    }

    match result {
        Ok(_) => {
            info!("Created database {}", db_name);
            ProvisionOutcome::Ready
        }
        Err(e) if is_duplicate_database(&e) => {
            info!("Database {} already exists", db_name);
            ProvisionOutcome::AlreadyExists
        }
        Err(e) => {
            let failure = ProvisionFailure::from(&e);
            warn!("Failed to create database {}: {}", db_name, failure);
            ProvisionOutcome::Failed(failure)
        }
    }
}
