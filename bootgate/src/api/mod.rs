//! Console HTTP surface outside the authentication routes.
//!
//! - [`handlers`]: index page and liveness check
//! - [`models`]: request/response types shared with the auth layer

pub mod handlers;
pub mod models;
