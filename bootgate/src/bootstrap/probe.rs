//! Single-shot database readiness probe.
//!
//! [`probe`] makes exactly one connection attempt and never retries. Retry policy belongs to the
//! caller: an orchestrator re-running `bootgate probe`, or [`wait_until_ready`] for the `wait`
//! command.

use sqlx::{Connection, PgConnection};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::bootstrap::{errors::ConnectFailure, target::ConnectionTarget};

/// Attempt one connection handshake with the administrative database.
///
/// The connection is closed as soon as it is established. Fails with a [`ConnectFailure`] when
/// the handshake does not finish within `timeout` or the server cannot be reached or rejects the
/// credentials.
#[instrument(skip(target), fields(host = %target.host(), port = target.port(), database = %target.admin_database()))]
pub async fn probe(target: &ConnectionTarget, timeout: Duration) -> Result<(), ConnectFailure> {
    let started = Instant::now();
    let options = target.admin_options();

    let conn = match tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            let failure = ConnectFailure::from(&e);
            warn!(kind = failure.kind.as_str(), "Database probe failed: {}", failure);
            return Err(failure);
        }
        Err(_) => {
            let failure = ConnectFailure::timeout(timeout);
            warn!(kind = failure.kind.as_str(), "Database probe failed: {}", failure);
            return Err(failure);
        }
    };

    // The server already accepted us; a failed goodbye does not change the answer
    if let Err(e) = conn.close().await {
        debug!("Error closing probe connection: {}", e);
    }

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Database accepted connection");
    Ok(())
}

/// Re-run [`probe`] every `interval` until it succeeds or `deadline` has passed.
///
/// Each attempt gets `probe_timeout`, shortened so no attempt runs past the deadline. Returns the
/// number of attempts made, or the last failure.
#[instrument(skip(target))]
pub async fn wait_until_ready(
    target: &ConnectionTarget,
    probe_timeout: Duration,
    interval: Duration,
    deadline: Duration,
) -> Result<u32, ConnectFailure> {
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_sub(started.elapsed());
        let attempt_timeout = probe_timeout.min(remaining);
        if attempt_timeout.is_zero() {
            return Err(ConnectFailure::timeout(deadline));
        }

        match probe(target, attempt_timeout).await {
            Ok(()) => return Ok(attempts),
            Err(failure) => {
                if started.elapsed() + interval >= deadline {
                    warn!(attempts, "Database not ready before deadline");
                    return Err(failure);
                }
                debug!(attempts, "Database not ready, retrying in {:?}", interval);
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::errors::ConnectErrorKind;
    use crate::test_utils::{live_target, target_at};
    use sqlx::PgPool;
    use tokio::net::TcpListener;

    /// A socket that completes the TCP handshake but never speaks the protocol.
    async fn silent_server() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_probe_times_out_against_silent_server() {
        let (_listener, port) = silent_server().await;
        let target = target_at(&format!("127.0.0.1:{port}"));
        let timeout = Duration::from_millis(300);

        let started = Instant::now();
        let failure = probe(&target, timeout).await.unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(failure.kind, ConnectErrorKind::Timeout);
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500), "probe took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_probe_refused_connection_is_io_failure() {
        let port = closed_port().await;
        let target = target_at(&format!("127.0.0.1:{port}"));
        let timeout = Duration::from_secs(2);

        let started = Instant::now();
        let failure = probe(&target, timeout).await.unwrap_err();

        assert_eq!(failure.kind, ConnectErrorKind::Io);
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_probe_unresolvable_host_fails_within_timeout() {
        let target = target_at("host.invalid");
        let timeout = Duration::from_secs(1);

        let started = Instant::now();
        let failure = probe(&target, timeout).await.unwrap_err();

        // Depending on the resolver this is either an immediate lookup error or a timeout
        assert!(matches!(failure.kind, ConnectErrorKind::Io | ConnectErrorKind::Timeout));
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    #[sqlx::test]
    async fn test_probe_live_database_succeeds(_pool: PgPool) {
        let target = live_target();
        probe(&target, Duration::from_secs(5)).await.unwrap();
    }

    #[sqlx::test]
    async fn test_probe_rejects_bad_password(_pool: PgPool) {
        let target = live_target().with_password("definitely-not-the-password");
        match probe(&target, Duration::from_secs(5)).await {
            // Servers configured with trust auth accept any password
            Ok(()) => {}
            Err(failure) => assert_eq!(failure.kind, ConnectErrorKind::Authentication, "unexpected failure: {failure:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_gives_up_at_deadline() {
        let port = closed_port().await;
        let target = target_at(&format!("127.0.0.1:{port}"));

        let started = Instant::now();
        let result = wait_until_ready(
            &target,
            Duration::from_millis(200),
            Duration::from_millis(50),
            Duration::from_millis(400),
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(400) + Duration::from_millis(500));
    }

    #[sqlx::test]
    async fn test_wait_returns_after_first_successful_probe(_pool: PgPool) {
        let target = live_target();
        let attempts = wait_until_ready(
            &target,
            Duration::from_secs(5),
            Duration::from_millis(100),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(attempts, 1);
    }
}
