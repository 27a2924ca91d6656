//! Versioned response cache with offline support.
//!
//! This module provides:
//! - Named cache generations, exactly one of them active
//! - Atomic precache of a generation and purge of all others on activation
//! - The per-request strategies (cache-first, network-first, network-only)
//! - Offline fallback page / synthetic 503 when the network is unavailable

mod layer;
mod storage;
mod traits;

pub use layer::CacheRuntime;
pub use storage::{GenerationStore, SqliteStorage};
pub use traits::{CachedResponse, GenerationInfo, GenerationState, Served, ServedFrom};
