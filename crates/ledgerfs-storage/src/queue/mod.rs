//! Durable pending-mutation queue
//!
//! A root's write-ahead queue lives in its own redb database. Rows are keyed
//! by sequence number and hold the sealed event plus a persisted flag.

mod guard;
mod wal;

pub use guard::QueueGuard;
pub use wal::{DurableQueue, QueueConfig, WalEntry};
