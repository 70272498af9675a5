use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header::COOKIE, request::Parts},
};
use tracing::{instrument, trace};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    errors::{Error, Result},
};

/// Extract user from JWT session cookie if present and valid
/// Returns:
/// - None: No session cookie present, or only invalid/expired ones
/// - Some(user): Valid JWT found and verified
#[instrument(skip(parts, config))]
fn try_jwt_session_auth(parts: &Parts, config: &Config) -> Option<CurrentUser> {
    let cookie_name = &config.auth.session.cookie_name;

    for header in parts.headers.get_all(COOKIE) {
        let Ok(cookie_str) = header.to_str() else {
            trace!("Skipping non-ASCII cookie header");
            continue;
        };

        for cookie in cookie_str.split(';') {
            let Some((name, value)) = cookie.trim().split_once('=') else {
                continue;
            };
            if name != cookie_name {
                continue;
            }
            match session::verify_session_token(value, config) {
                Ok(user) => return Some(user),
                // Expired tokens are expected; keep looking
                Err(e) => trace!("Ignoring session cookie: {:?}", e),
            }
        }
    }
    None
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        try_jwt_session_auth(parts, &state.config).ok_or(Error::Unauthenticated { message: None })
    }
}

impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>> {
        Ok(try_jwt_session_auth(parts, &state.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{InMemoryUserStore, create_test_config, create_test_state};
    use uuid::Uuid;

    fn parts_with_cookie(cookie: &str) -> Parts {
        let request = axum::http::Request::builder()
            .uri("http://localhost/test")
            .header(COOKIE, cookie)
            .body(())
            .unwrap();
        request.into_parts().0
    }

    fn token_for(user: &CurrentUser) -> String {
        session::create_session_token(user, &create_test_config()).unwrap()
    }

    fn user() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            username: "viewer".to_string(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_valid_session_cookie() {
        let state = create_test_state(InMemoryUserStore::default());
        let user = user();
        let mut parts = parts_with_cookie(&format!("other=1; bootgate_session={}", token_for(&user)));

        let extracted = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(extracted, user);
    }

    #[tokio::test]
    async fn test_missing_cookie_is_unauthenticated() {
        let state = create_test_state(InMemoryUserStore::default());
        let mut parts = parts_with_cookie("other=1");

        let result = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));

        let optional = <CurrentUser as OptionalFromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(optional.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cookie_falls_through_to_valid_one() {
        let state = create_test_state(InMemoryUserStore::default());
        let user = user();
        let mut parts = parts_with_cookie(&format!(
            "bootgate_session=garbage; bootgate_session={}",
            token_for(&user)
        ));

        let extracted = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(extracted.username, "viewer");
    }

    #[tokio::test]
    async fn test_token_signed_with_other_key_rejected() {
        let state = create_test_state(InMemoryUserStore::default());
        let mut other = create_test_config();
        other.secret_key = Some("someone-elses-key".to_string());
        let forged = session::create_session_token(&user(), &other).unwrap();
        let mut parts = parts_with_cookie(&format!("bootgate_session={forged}"));

        let result = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(Error::Unauthenticated { .. })));
    }
}
