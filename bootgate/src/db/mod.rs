//! Database layer for the console's user store.
//!
//! Uses SQLx with PostgreSQL and follows the repository pattern:
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (login / identity grant routes)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │  UserStore  │  (db::store - lookup by username)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures
//! - [`store`]: The [`store::UserStore`] seam used by the HTTP layer
//! - [`errors`]: Database-specific error types

pub mod errors;
pub mod handlers;
pub mod models;
pub mod store;
