//! Diesel-based work store.
//!
//! Uses diesel-async for async database support. Works with both SQLite and PostgreSQL.
//!
//! Split into submodules:
//! - `mod.rs` (this file): Main struct
//! - `enqueue.rs`: Idempotent item insertion
//! - `claim.rs`: Atomic batch claiming
//! - `outcome.rs`: Outcome reporting and early claim release
//! - `lease.rs`: Expired lease recovery
//! - `stats.rs`: Progress counts and item inspection
//! - `runs.rs`: Run registry

mod claim;
mod enqueue;
mod lease;
mod outcome;
mod runs;
mod stats;

use super::pool::DbPool;

/// Error recorded on items failed by the lease sweeper.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// Error recorded on items a stopping worker gave back at the end of their budget.
pub const RELEASED_ERROR: &str = "released before processing";

/// Diesel-based work store supporting SQLite and PostgreSQL.
///
/// Every state transition is a single guarded statement, so any number of
/// worker processes can share one database.
#[derive(Clone)]
pub struct DieselWorkStore {
    pool: DbPool,
}

impl DieselWorkStore {
    /// Create a new Diesel work store with an existing pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
