//! Durable retry subsystem.
//!
//! Each endpoint owns a [`RetryStore`]: a directory of pending payloads that
//! could not be delivered. A single [`RetryScheduler`] task periodically
//! drains every registered store at its endpoint's own interval.
//!
//! On-disk layout:
//!
//! ```text
//! <retry_root>/
//!   endpoint_0/
//!     msg1700000000123.txt     pending payload
//!     .msg1700000000456.txt    write in progress (ignored by drains)
//!   endpoint_1/
//! ```

mod scheduler;
mod store;

pub use scheduler::{RetryScheduler, RetryTarget, MAX_RETRY_INTERVAL};
pub use store::{DrainReport, PersistError, RetryStore};
