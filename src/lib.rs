//! cacheguard - cache penetration and breakdown protection
//!
//! Get-or-load access to a shared key-value cache with three strategies:
//! absence caching, logical expiration with background rebuilds, and
//! per-key mutual exclusion around loads.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod rebuild;
pub mod store;
mod sweep;
pub mod ui;

pub use cache::{
    create_accessor, AccessorSettings, CacheAccessor, CacheEntry, Cached, LogicalRead,
};
pub use error::{CacheError, CacheResult};
pub use lock::{LockManager, LockTiming, LockToken};
pub use rebuild::{RebuildScheduler, SubmitOutcome};
pub use store::CacheStore;
