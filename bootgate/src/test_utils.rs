//! Test utilities for integration testing (available with `test-utils` feature).

use crate::{
    AppState,
    auth::password::{self, Argon2Params},
    bootstrap::target::ConnectionTarget,
    config::{Config, DatabaseConfig, PasswordConfig},
    db::{
        errors::{DbError, Result},
        models::users::UserDBResponse,
        store::UserStore,
    },
};
use axum_test::TestServer;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use url::Url;
use uuid::Uuid;

/// Cheap Argon2 parameters so tests that hash passwords stay fast
pub fn fast_password_config() -> PasswordConfig {
    PasswordConfig {
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        argon2_parallelism: 1,
    }
}

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig {
            engine: Some("postgres".to_string()),
            host: Some("localhost".to_string()),
            user: Some("app".to_string()),
            password: Some("secret".to_string()),
            admin_database: Some("postgres".to_string()),
            app_database: Some("reports".to_string()),
        },
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: crate::config::AuthConfig {
            session: crate::config::SessionConfig {
                cookie_secure: false,
                ..Default::default()
            },
            password: fast_password_config(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A target on `address` with throwaway credentials, for tests that never get past the handshake.
pub fn target_at(address: &str) -> ConnectionTarget {
    ConnectionTarget::new(
        "postgres".parse().expect("postgres is a supported engine"),
        address,
        "app",
        "secret",
        "postgres",
        "reports",
    )
    .expect("valid test target")
}

/// The server `DATABASE_URL` points at, as used by `#[sqlx::test]`.
///
/// The URL's database becomes the administrative database.
pub fn live_target() -> ConnectionTarget {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
    let url = Url::parse(&url).expect("DATABASE_URL must be a valid URL");

    let host = url.host_str().unwrap_or("localhost");
    let address = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let decode = |s: &str| {
        urlencoding::decode(s)
            .expect("DATABASE_URL credentials must be valid UTF-8")
            .into_owned()
    };
    let user = decode(url.username());
    let password = url.password().map(decode).unwrap_or_default();
    let admin_database = match url.path().trim_start_matches('/') {
        "" => user.clone(),
        db => db.to_string(),
    };

    ConnectionTarget::new(
        url.scheme().parse().expect("DATABASE_URL must be a postgres URL"),
        &address,
        &user,
        &password,
        &admin_database,
        "bootgate_reports",
    )
    .expect("valid live target")
}

/// [`UserStore`] over a shared in-memory list. Clones share the same users.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<Mutex<Vec<UserDBResponse>>>,
}

impl InMemoryUserStore {
    /// Add a user, hashing `password` when one is given.
    pub fn add_user(&self, username: &str, password: Option<&str>, is_admin: bool) -> UserDBResponse {
        let password_hash = password.map(|p| {
            password::hash_password(p, Argon2Params::from(&fast_password_config())).expect("hash test password")
        });
        let now = Utc::now();
        let user = UserDBResponse {
            id: Uuid::new_v4(),
            username: username.to_string(),
            is_admin,
            password_hash,
            created_at: now,
            updated_at: now,
        };
        self.users.lock().expect("user store lock").push(user.clone());
        user
    }

    pub fn len(&self) -> usize {
        self.users.lock().expect("user store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_user(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let users = self.users.lock().expect("user store lock");
        Ok(users.iter().find(|u| u.username == username).cloned())
    }
}

/// [`UserStore`] whose every lookup fails, as if the database were gone.
#[derive(Debug, Clone, Copy)]
pub struct FailingUserStore;

#[async_trait::async_trait]
impl UserStore for FailingUserStore {
    async fn find_user(&self, _username: &str) -> Result<Option<UserDBResponse>> {
        Err(DbError::Other(anyhow::anyhow!("user store unavailable")))
    }
}

pub fn create_test_state(users: impl UserStore + 'static) -> AppState {
    AppState::builder().config(create_test_config()).users(Arc::new(users)).build()
}

/// Full console router over `users`, with the test configuration.
pub fn create_test_server(users: impl UserStore + 'static) -> TestServer {
    create_test_server_with_config(users, create_test_config())
}

pub fn create_test_server_with_config(users: impl UserStore + 'static, config: Config) -> TestServer {
    let state = AppState::builder().config(config).users(Arc::new(users)).build();
    TestServer::new(crate::build_router(state)).expect("Failed to create test server")
}
