//! Unverified-identity session grant.
//!
//! `GET|POST /secret?username=<name>&redirect=<url>` signs the caller in as `<name>` without
//! checking any credential. Naming an existing user is the only proof required, so anyone who can
//! reach this route can become any user, administrators included. It exists for controlled
//! bootstrap and demo deployments and is switched off with
//! `auth.unverified_identity_grant.enabled = false`.
//!
//! Every path out of the handler is a redirect:
//!
//! | Request | Outcome |
//! |---|---|
//! | no `username`, or an empty one | `/login` |
//! | `username` names no user | `/login` |
//! | user lookup fails | `/login` |
//! | `username` names a user | session cookie, then `redirect`, or the index when absent |
//!
//! The route never creates users.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::HeaderValue,
    response::Response,
};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::{
        LOGIN_PATH,
        session::{self, CookieLifetime},
        see_other,
    },
};

/// Request parameters. Both are optional; the handler decides what absence means.
#[derive(Debug, Default, Deserialize)]
pub struct GrantParams {
    /// The identity token: a username, taken verbatim
    pub username: Option<String>,
    /// Where to go once signed in
    pub redirect: Option<String>,
}

/// Exchange an identity token for a session.
#[instrument(skip_all)]
pub async fn grant(State(state): State<AppState>, params: Result<Query<GrantParams>, QueryRejection>) -> Response {
    let GrantParams { username, redirect } = match params {
        Ok(Query(params)) => params,
        Err(e) => {
            info!("Unreadable identity grant query, sending to login: {}", e);
            return see_other(LOGIN_PATH, None);
        }
    };

    let Some(username) = username.filter(|u| !u.is_empty()) else {
        return see_other(LOGIN_PATH, None);
    };

    let user = match state.users.find_user(&username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(username = %username, "Identity grant for unknown user refused");
            return see_other(LOGIN_PATH, None);
        }
        Err(e) => {
            error!(username = %username, "User lookup failed during identity grant: {}", e);
            return see_other(LOGIN_PATH, None);
        }
    };

    let current_user = CurrentUser::from(user);
    let token = match session::create_session_token(&current_user, &state.config) {
        Ok(token) => token,
        Err(e) => {
            error!("Could not issue session for identity grant: {}", e);
            return see_other(LOGIN_PATH, None);
        }
    };
    let cookie = session::session_cookie(&token, &state.config, CookieLifetime::BrowserSession);

    let location = match redirect.filter(|r| !r.is_empty()) {
        Some(target) if HeaderValue::from_str(&target).is_ok() => target,
        Some(_) => {
            warn!("Redirect target cannot be sent as a Location header, using the index");
            state.config.index_path.clone()
        }
        None => state.config.index_path.clone(),
    };

    warn!(
        username = %current_user.username,
        is_admin = current_user.is_admin,
        "Session granted without credential verification"
    );
    see_other(&location, Some(cookie))
}
