//! # bootgate: bootstrap and sign-in for an administrative console
//!
//! `bootgate` gets a console from "container started" to "serving" and decides who may use it.
//!
//! ## Overview
//!
//! Three components run in strict order at process start:
//!
//! 1. **Readiness probe** ([`bootstrap::probe`]): one timeout-bounded connection attempt against
//!    the administrative database. It never retries; the orchestrator re-invokes it (or the
//!    opt-in `wait` command does).
//! 2. **Provisioner** ([`bootstrap::provision`]): idempotently creates the application database.
//!    "Already exists" is success.
//! 3. **Authentication override** ([`auth::AuthOverride`]): registers the standard login routes and
//!    the unverified-identity session grant onto the console router.
//!
//! The probe gates the provisioner, which gates serving. Once the server is up, only the
//! authentication routes are active.
//!
//! ## Command line
//!
//! ```text
//! bootgate probe       # exit 0 and print OK once the server accepts a connection
//! bootgate wait        # re-run the probe until --deadline
//! bootgate provision   # create the application database if missing
//! bootgate [serve]     # serve the console
//! ```
//!
//! Bootstrap failures print one line, `{category}: {message}`, to stdout and exit 1.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use bootgate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = bootgate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     bootgate::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod telemetry;
mod templates;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    auth::{AuthOverride, password},
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
        store::{PgUserStore, UserStore},
    },
};
use axum::{Router, routing::get};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument};

pub use types::UserId;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .users(Arc::new(PgUserStore::new(pool)))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserStore>,
}

/// Get the console database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: creates the admin when absent, and otherwise makes sure the existing user is an
/// admin and, when `password` is given, updates its password. With no password the user can
/// still be signed in through the identity grant.
#[instrument(skip_all, fields(username = %username))]
pub async fn create_initial_admin_user(
    username: &str,
    password: Option<&str>,
    params: password::Argon2Params,
    db: &PgPool,
) -> Result<UserId, DbError> {
    let password_hash = match password {
        Some(pwd) => {
            let pwd = pwd.to_string();
            let hash = tokio::task::spawn_blocking(move || password::hash_password(&pwd, params))
                .await
                .map_err(|e| DbError::Other(anyhow::anyhow!("spawn password hashing task: {e}")))?
                .map_err(|e| DbError::Other(anyhow::anyhow!("hash admin password: {e}")))?;
            Some(hash)
        }
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    let user_id = match user_repo.get_user_by_username(username).await? {
        Some(existing) => {
            let update = UserUpdateDBRequest {
                is_admin: Some(true),
                password_hash,
            };
            user_repo.update(existing.id, &update).await?;
            debug!("Admin user already exists");
            existing.id
        }
        None => {
            let created = user_repo
                .create(&UserCreateDBRequest {
                    username: username.to_string(),
                    is_admin: true,
                    password_hash,
                })
                .await?;
            info!("Created admin user");
            created.id
        }
    };

    tx.commit().await?;
    Ok(user_id)
}

/// Connect to the application database, run migrations and seed the admin user.
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let target = config.connection_target()?;
    info!("Using console database {}", target.redacted_url(target.app_database()));

    let pool_settings = &config.pool;
    let mut options = PgPoolOptions::new()
        .max_connections(pool_settings.max_connections)
        .min_connections(pool_settings.min_connections)
        .acquire_timeout(Duration::from_secs(pool_settings.acquire_timeout_secs));
    if pool_settings.idle_timeout_secs > 0 {
        options = options.idle_timeout(Duration::from_secs(pool_settings.idle_timeout_secs));
    }
    let pool = options.connect_with(target.app_options()).await?;

    migrator().run(&pool).await?;

    create_initial_admin_user(
        &config.admin_username,
        config.admin_password.as_deref(),
        password::Argon2Params::from(&config.auth.password),
        &pool,
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    Ok(pool)
}

/// Build the console router: index, liveness check and the authentication routes.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/healthz", get(api::handlers::index::healthz))
        .route(&state.config.index_path, get(api::handlers::index::index));
    let router = AuthOverride::install(router, &state.config);

    router.with_state(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// The console server.
///
/// 1. **Create**: [`Application::new`] connects to the application database, runs migrations,
///    seeds the admin user and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate_for_serving()?;
        debug!("Starting console with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;
        Ok(Self::with_pool(config, pool))
    }

    /// Build on an existing pool. The pool must already be migrated.
    pub fn with_pool(config: Config, pool: PgPool) -> Self {
        let state = AppState::builder()
            .config(config.clone())
            .users(Arc::new(PgUserStore::new(pool.clone())))
            .build();
        let router = build_router(state);
        Self { router, config, pool }
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Console listening on http://{}, available at {}",
            bind_addr, self.config.public_url
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

/// Build and serve the console until `shutdown` resolves.
///
/// Telemetry is flushed on every exit path, including a failed startup, so spans recorded before
/// the error still reach the exporter.
pub async fn run_console<F>(config: Config, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let result = async { Application::new(config).await?.serve(shutdown).await }.await;
    if let Err(e) = &result {
        tracing::error!("Console stopped with error: {:#}", e);
        telemetry::shutdown_telemetry();
    }
    result
}
