use axum::response::{IntoResponse, Response};
use minijinja::context;
use tracing::instrument;

use crate::{
    api::models::users::CurrentUser,
    auth::{LOGIN_PATH, see_other},
    errors::Error,
    templates,
};

/// Console landing page. Anonymous visitors are sent to the login form.
#[instrument(skip_all)]
pub async fn index(user: Option<CurrentUser>) -> Result<Response, Error> {
    let Some(user) = user else {
        return Ok(see_other(LOGIN_PATH, None));
    };
    let page = templates::render(
        templates::INDEX,
        context! { username => user.username, is_admin => user.is_admin },
    )?;
    Ok(page.into_response())
}

/// Liveness check
pub async fn healthz() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{InMemoryUserStore, create_test_server};
    use axum::http::{StatusCode, header};

    #[tokio::test]
    async fn test_index_requires_session() {
        let server = create_test_server(InMemoryUserStore::default());

        let response = server.get("/").await;
        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.header(header::LOCATION), "/login");
    }

    #[tokio::test]
    async fn test_index_after_grant() {
        let users = InMemoryUserStore::default();
        users.add_user("viewer", None, false);
        let mut server = create_test_server(users);
        server.save_cookies();

        server.get("/secret?username=viewer").await;

        let response = server.get("/").await;
        response.assert_status_ok();
        assert!(response.text().contains("viewer"));

        server.get("/logout").await;
        server.get("/").await.assert_status(StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn test_healthz() {
        let server = create_test_server(InMemoryUserStore::default());
        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }
}
