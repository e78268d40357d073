//! Scoped acquisition: run a unit of work under the lock and release on
//! every exit path.
//!
//! [`with_read_lock`] and [`with_write_lock`] pair an acquisition with
//! exactly one release whether the work succeeds or fails, and compose the
//! two possible failures without letting either mask the other: a release
//! failure after successful work becomes the operation's failure, and a
//! release failure after failed work is reported *alongside* the work's
//! failure, never instead of it.

use core::fmt;
use std::future::Future;

use crate::error::InvariantViolation;
use crate::lock::RwMutex;

/// Error returned by the scoped helpers.
///
/// The work failure is re-raised unchanged as [`Work`](Self::Work); a
/// failed release means the lock was force-released by unrelated code
/// while the work ran, which the caller must see even when the work itself
/// succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithLockError<E> {
    /// The unit of work failed; the lock was released cleanly.
    Work(E),
    /// The unit of work succeeded but releasing the lock failed.
    Release(InvariantViolation),
    /// Both the unit of work and the release failed. Both failures are
    /// retained.
    Combined {
        /// The failure returned by the unit of work.
        work: E,
        /// The failure returned by the release.
        release: InvariantViolation,
    },
}

impl<E> WithLockError<E> {
    /// The failure produced by the unit of work, if any.
    pub fn work(&self) -> Option<&E> {
        match self {
            Self::Work(work) | Self::Combined { work, .. } => Some(work),
            Self::Release(_) => None,
        }
    }

    /// The failure produced by releasing the lock, if any.
    pub fn release(&self) -> Option<InvariantViolation> {
        match self {
            Self::Release(release) | Self::Combined { release, .. } => Some(*release),
            Self::Work(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for WithLockError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work(work) => write!(f, "{work}"),
            Self::Release(release) => {
                write!(f, "lock release failed after successful work: {release}")
            }
            Self::Combined { work, release } => {
                write!(f, "{work} (additionally, lock release failed: {release})")
            }
        }
    }
}

impl<E> std::error::Error for WithLockError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Work(work) => work.source(),
            Self::Release(release) | Self::Combined { release, .. } => Some(release),
        }
    }
}

/// Runs `work` while holding a read lock on `lock`.
///
/// The lock is released exactly once before this returns, on both the
/// success and the failure path. A panic in `work` is not intercepted and
/// leaves the lock held.
///
/// # Errors
///
/// See [`WithLockError`] for how a work failure and a release failure
/// combine.
pub async fn with_read_lock<T, E, F, Fut>(lock: &RwMutex, work: F) -> Result<T, WithLockError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    lock.read_lock().await;
    let outcome = work().await;
    finish(outcome, lock.read_unlock())
}

/// Runs `work` while holding the write lock on `lock`.
///
/// The lock is released exactly once before this returns, on both the
/// success and the failure path. A panic in `work` is not intercepted and
/// leaves the lock held.
///
/// # Errors
///
/// See [`WithLockError`] for how a work failure and a release failure
/// combine.
pub async fn with_write_lock<T, E, F, Fut>(lock: &RwMutex, work: F) -> Result<T, WithLockError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    lock.write_lock().await;
    let outcome = work().await;
    finish(outcome, lock.write_unlock())
}

fn finish<T, E>(
    work: Result<T, E>,
    release: Result<(), InvariantViolation>,
) -> Result<T, WithLockError<E>> {
    match (work, release) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release)) => Err(WithLockError::Release(release)),
        (Err(work), Ok(())) => Err(WithLockError::Work(work)),
        (Err(work), Err(release)) => Err(WithLockError::Combined { work, release }),
    }
}
