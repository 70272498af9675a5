//! Console authentication.
//!
//! Sessions are signed JWTs carried in an HTTP-only cookie. There are two ways to get one:
//!
//! - **Standard login** (`/login`, `/login/`): username and password, verified against the
//!   stored Argon2 hash.
//! - **Unverified-identity session grant** (`/secret`): a session for any existing user, named in
//!   the query string, with no credential check. See [`identity_grant`].
//!
//! Both are registered onto the host router by [`AuthOverride::install`].
//!
//! # Modules
//!
//! - [`current_user`]: Extractor for the signed-in user
//! - [`identity_grant`]: The `/secret` route
//! - [`login`]: The login form and `/logout`
//! - [`password`]: Password hashing and verification using Argon2
//! - [`session`]: Session tokens and cookies
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use bootgate::api::models::users::CurrentUser;
//!
//! async fn protected_handler(user: CurrentUser) -> String {
//!     format!("Hello, {}!", user.username)
//! }
//! ```

pub mod current_user;
pub mod identity_grant;
pub mod login;
pub mod password;
pub mod session;

use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{info, warn};
use url::Url;

use crate::{AppState, config::Config};

pub const LOGIN_PATH: &str = "/login";
pub const GRANT_PATH: &str = "/secret";
pub const LOGOUT_PATH: &str = "/logout";

/// 303 redirect to `location`, optionally setting a cookie on the way.
///
/// A location that is not a valid header value is replaced by `/`.
pub(crate) fn see_other(location: &str, cookie: Option<String>) -> Response {
    let location = HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
    let mut response = (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response();
    if let Some(cookie) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// Registers the console's authentication routes onto a host router.
pub struct AuthOverride;

impl AuthOverride {
    /// Add the login, logout and (when enabled) identity grant routes to `router`.
    pub fn install(router: Router<AppState>, config: &Config) -> Router<AppState> {
        let login_route = get(login::login_page).post(login::login);
        let router = router
            .route(LOGIN_PATH, login_route.clone())
            .route("/login/", login_route)
            .route(LOGOUT_PATH, get(login::logout));

        if !config.auth.unverified_identity_grant.enabled {
            info!("Unverified identity grant disabled");
            return router;
        }

        warn!(
            "Unverified identity grant is enabled: anyone who can reach {} can sign in as any existing user",
            GRANT_PATH
        );
        info!("Access the console at {}", access_hint(config));

        router.route(GRANT_PATH, get(identity_grant::grant).post(identity_grant::grant))
    }
}

/// `<public_url>/secret?username=<admin>&redirect=/`
pub fn access_hint(config: &Config) -> String {
    match Url::parse(&config.public_url).and_then(|base| base.join(GRANT_PATH)) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("username", &config.admin_username)
                .append_pair("redirect", "/");
            url.to_string()
        }
        Err(_) => format!(
            "{}{}?username={}&redirect=/",
            config.public_url.trim_end_matches('/'),
            GRANT_PATH,
            config.admin_username
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;

    #[test]
    fn test_access_hint() {
        let mut config = create_test_config();
        config.public_url = "https://console.example.com".to_string();
        config.admin_username = "super admin".to_string();

        assert_eq!(
            access_hint(&config),
            "https://console.example.com/secret?username=super+admin&redirect=%2F"
        );
    }

    #[test]
    fn test_see_other_with_invalid_location() {
        let response = see_other("/ok\nnot", None);
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
