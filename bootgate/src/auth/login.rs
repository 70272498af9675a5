//! The standard username/password login route.

use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use minijinja::context;
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::users::{CurrentUser, LoginForm},
    auth::{
        LOGIN_PATH, password,
        session::{self, CookieLifetime},
        see_other,
    },
    errors::Error,
    templates,
};

const INVALID_CREDENTIALS: &str = "Invalid username or password";

fn login_form(username: &str, error: Option<&str>) -> Result<Html<String>, Error> {
    templates::render(templates::LOGIN, context! { username => username, error => error })
}

/// Render the login form
#[instrument(skip_all)]
pub async fn login_page() -> Result<Html<String>, Error> {
    login_form("", None)
}

/// Verify credentials and start a session.
///
/// Query parameters play no part in authentication. A failed attempt re-renders the form with
/// status 401 and never sets a cookie.
#[instrument(skip_all, fields(username = %form.username))]
pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Result<Response, Error> {
    let rejected = || -> Result<Response, Error> {
        Ok((StatusCode::UNAUTHORIZED, login_form(&form.username, Some(INVALID_CREDENTIALS))?).into_response())
    };

    let Some(user) = state.users.find_user(&form.username).await? else {
        info!("Login failed: unknown user");
        return rejected();
    };

    // Users without a password can only be signed in through other routes
    let Some(hash) = user.password_hash.clone() else {
        info!("Login failed: user has no password");
        return rejected();
    };

    if !password::verify_password_blocking(form.password.clone(), hash).await? {
        info!("Login failed: wrong password");
        return rejected();
    }

    let current_user = CurrentUser::from(user);
    let token = session::create_session_token(&current_user, &state.config)?;
    let cookie = session::session_cookie(&token, &state.config, CookieLifetime::Persistent);

    info!("Login succeeded");
    Ok(see_other(&state.config.index_path, Some(cookie)))
}

/// Clear the session cookie
#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Response {
    see_other(LOGIN_PATH, Some(session::clear_session_cookie(&state.config)))
}
