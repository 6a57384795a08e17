//! Swap state persistence
//!
//! Handles:
//! - Swap and swap result records keyed by source identity
//! - Sparse field updates with per-status memo and reset rules
//! - Status scans for the rescanning workers
//! - PostgreSQL and in-process backends

mod manager;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod repository;
pub mod updates;

pub use manager::{KeyedLock, StateManager};
pub use memory::MemorySwapStore;
pub use postgres::PgSwapStore;
pub use records::{SwapInfo, SwapKey, SwapRecord, SwapResultRecord};
pub use repository::{ResultFilter, SwapRepository};
pub use updates::SwapResultUpdate;

/// Current time in epoch seconds, the unit of every record timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
