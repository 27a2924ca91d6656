//! Background synchronization of requests that failed while offline.
//!
//! Mutating requests under the syncable path prefix that hit a connectivity
//! error are stored durably and replayed when the host signals that the
//! network is back. Application errors (4xx/5xx) are never queued.

mod queue;

pub use queue::{DrainReport, Enqueued, SyncEntry, SyncQueue};
