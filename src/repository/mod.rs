//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking.
//! Supports both SQLite and PostgreSQL backends.

pub mod context;
pub mod models;
pub mod pool;
pub mod util;
pub mod work_store;

pub use context::DbContext;
pub use util::{redact_url_password, validate_database_url};
pub use work_store::{DieselWorkStore, LEASE_EXPIRED_ERROR, RELEASED_ERROR};
