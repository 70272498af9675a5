//! User lookup used by the authentication routes.
//!
//! Handlers depend on [`UserStore`] rather than on a pool directly, so the routes can be
//! exercised against an in-memory store in tests.

use sqlx::PgPool;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    handlers::Users,
    models::users::UserDBResponse,
};

/// Read-only access to console users by username.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by exact username. `Ok(None)` means no such user.
    async fn find_user(&self, username: &str) -> Result<Option<UserDBResponse>>;
}

/// [`UserStore`] backed by the application database.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self), err)]
    async fn find_user(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Users::new(&mut conn).get_user_by_username(username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{handlers::Repository, models::users::UserCreateDBRequest};

    #[sqlx::test]
    async fn test_pg_user_store_finds_existing_user(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                username: "viewer".to_string(),
                is_admin: false,
                password_hash: None,
            })
            .await
            .unwrap();
        drop(conn);

        let store = PgUserStore::new(pool);
        let user = store.find_user("viewer").await.unwrap();
        assert_eq!(user.map(|u| u.username), Some("viewer".to_string()));
        assert!(store.find_user("ghost").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_pg_user_store_closed_pool_is_error(pool: PgPool) {
        let store = PgUserStore::new(pool.clone());
        pool.close().await;

        assert!(store.find_user("viewer").await.is_err());
    }
}
