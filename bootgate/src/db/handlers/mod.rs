//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection or transaction and returns models from
//! [`crate::db::models`]. Repositories implement the [`Repository`] trait.
//!
//! ```ignore
//! use bootgate::db::handlers::{Users, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let mut repo = Users::new(&mut tx);
//! if let Some(user) = repo.get_user_by_username("superadmin").await? {
//!     println!("Found user: {}", user.username);
//! }
//! tx.commit().await?;
//! ```

pub mod repository;
pub mod users;

pub use repository::Repository;
pub use users::Users;
