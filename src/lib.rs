//! Fair asynchronous reader-writer mutex for cooperative schedulers.
//!
//! [`RwMutex`] lets many concurrent readers proceed simultaneously while a
//! writer gets exclusive access, and orders waiters fairly: acquisitions
//! are granted in arrival order across both classes, except that readers
//! queued contiguously ahead of the next writer are granted together as
//! one batch. Neither class can starve the other.
//!
//! Unlike most Rust locks, the mutex does not own the protected data and
//! release is an explicit, fallible operation: an unbalanced release is a
//! caller bug and fails synchronously with [`InvariantViolation`] instead
//! of being swallowed. The [`with_read_lock`] and [`with_write_lock`]
//! helpers wrap a unit of work so the release happens exactly once on
//! every exit path, composing a work failure with a release failure
//! without discarding either.
//!
//! The crate is executor-agnostic: acquisition futures rely only on the
//! [`Waker`](std::task::Waker) contract and can be polled by any runtime.
//!
//! # Example
//!
//! ```ignore
//! use rwmutex::{with_write_lock, RwMutex};
//!
//! let lock = RwMutex::new();
//!
//! let value = with_write_lock(&lock, || async {
//!     // exclusive access here
//!     Ok::<_, std::io::Error>(42)
//! })
//! .await?;
//! ```
//!
//! # What this is not
//!
//! - Not a cross-process or cross-machine lock: it coordinates logical
//!   tasks within one process.
//! - Not reentrant: a task that acquires a lock it already holds
//!   deadlocks behind its own queue entry.
//! - No cancellation or timeout for queued waiters; dropping an
//!   acquisition future cleanly abandons its place in line, but no
//!   timeout path exists.

#![warn(missing_docs)]

mod error;
mod lock;
mod scoped;
#[cfg(test)]
pub(crate) mod test_util;

pub use error::InvariantViolation;
pub use lock::{LockState, ReadLockFuture, RwMutex, WriteLockFuture};
pub use scoped::{with_read_lock, with_write_lock, WithLockError};
