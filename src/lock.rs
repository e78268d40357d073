//! Fair reader-writer lock core with FIFO handoff.
//!
//! [`RwMutex`] allows any number of readers or a single writer. Waiters are
//! granted the lock in arrival order across both classes, with one
//! batching rule: readers that queued contiguously ahead of the next writer
//! are granted together in a single release pass.
//!
//! # Fairness Characteristics
//!
//! | Scenario                     | Behavior                                     |
//! |------------------------------|----------------------------------------------|
//! | No writer held or queued     | Readers acquire immediately                  |
//! | Writer queued                | New readers queue behind it (no starvation)  |
//! | Readers held + writer queued | Writer acquires once all readers release     |
//! | Mixed waiters                | Granted strictly in arrival order            |
//!
//! A continuous stream of readers cannot starve a queued writer: once a
//! write request is queued, later read requests go behind it. A continuous
//! stream of writers cannot starve queued readers either, because a writer
//! arriving after queued readers queues behind them.
//!
//! # Handoff
//!
//! Releasing never transfers ownership inside the releasing call. The
//! release pass dequeues the selected waiters, records the transfer, and
//! wakes them; each woken future claims ownership on its next poll. Code
//! running after a release in the same task therefore observes the lock as
//! released before any woken waiter runs, and no late acquisition can
//! barge past a waiter that was already selected.
//!
//! # Reentrancy
//!
//! The lock is not reentrant. A task that acquires while already holding
//! the lock queues behind its own release and deadlocks.
//!
//! # Example
//!
//! ```ignore
//! use rwmutex::RwMutex;
//!
//! let lock = RwMutex::new();
//!
//! // Many readers may hold the lock at once.
//! lock.read_lock().await;
//! lock.read_lock().await;
//! lock.read_unlock()?;
//! lock.read_unlock()?;
//!
//! // A writer gets exclusive access.
//! lock.write_lock().await;
//! lock.write_unlock()?;
//! ```

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::error::InvariantViolation;

/// Observable state of an [`RwMutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockState {
    /// No reader or writer holds the lock.
    #[default]
    Unlocked,
    /// One or more readers hold the lock.
    ReadLocked,
    /// A writer holds the lock exclusively.
    WriteLocked,
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::ReadLocked => write!(f, "read-locked"),
            Self::WriteLocked => write!(f, "write-locked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitKind {
    Read,
    Write,
}

/// One pending acquisition. Dequeueing a waiter is the one-shot grant:
/// its future observes the dequeue on the next poll and claims ownership.
#[derive(Debug, Clone)]
struct Waiter {
    id: u64,
    kind: WaitKind,
    waker: Waker,
}

type WakerBatch = SmallVec<[Waker; 4]>;

#[derive(Debug, Default, Clone)]
struct State {
    /// Readers currently holding the lock.
    readers: usize,
    /// Whether a writer currently holds the lock.
    writer_held: bool,
    /// Pending acquisitions in arrival order.
    queue: VecDeque<Waiter>,
    /// Reader grants issued but not yet claimed by their futures.
    handoff_readers: usize,
    /// Writer grant issued but not yet claimed.
    handoff_writer: bool,
    next_waiter_id: u64,
}

impl State {
    /// Nothing held and no handoff in flight. Implies the queue is empty:
    /// every transition into this state runs a grant pass first.
    #[inline]
    fn idle(&self) -> bool {
        self.readers == 0 && !self.writer_held && self.handoff_readers == 0 && !self.handoff_writer
    }

    #[inline]
    fn has_queued_writer(&self) -> bool {
        self.queue.iter().any(|w| w.kind == WaitKind::Write)
    }

    fn enqueue(&mut self, kind: WaitKind, waker: Waker) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.queue.push_back(Waiter { id, kind, waker });
        tracing::trace!(waiter = id, kind = ?kind, depth = self.queue.len(), "acquisition queued");
        id
    }

    #[inline]
    fn position(&self, id: u64) -> Option<usize> {
        self.queue.iter().position(|w| w.id == id)
    }

    /// The release pass: selects which waiters the queue hands the lock to.
    ///
    /// Grants the maximal run of readers at the front of the queue. A
    /// writer at the front is granted only when no reader was granted in
    /// the same pass and nothing read-side is held or in flight; a writer
    /// reached after granted readers stays at the head for a later pass.
    ///
    /// Precondition-guarded so release and cleanup paths can call it
    /// unconditionally. Returned wakers must be woken after the state
    /// mutex is released.
    fn grant_pass(&mut self) -> WakerBatch {
        let mut woken = WakerBatch::new();
        if self.writer_held || self.handoff_writer {
            return woken;
        }

        while self.queue.front().is_some_and(|w| w.kind == WaitKind::Read) {
            if let Some(waiter) = self.queue.pop_front() {
                self.handoff_readers += 1;
                woken.push(waiter.waker);
            }
        }
        if !woken.is_empty() {
            tracing::trace!(batch = woken.len(), "handing off lock to reader batch");
            return woken;
        }

        if self.readers == 0
            && self.handoff_readers == 0
            && self.queue.front().is_some_and(|w| w.kind == WaitKind::Write)
        {
            if let Some(waiter) = self.queue.pop_front() {
                tracing::trace!(waiter = waiter.id, "handing off lock to writer");
                self.handoff_writer = true;
                woken.push(waiter.waker);
            }
        }
        woken
    }
}

/// A fair asynchronous reader-writer mutex.
///
/// The mutex does not wrap the protected data; callers pair it with
/// whatever resource it guards and balance every successful acquisition
/// with exactly one release. Unbalanced releases fail with
/// [`InvariantViolation`]. For acquire/release pairing handled on every
/// exit path, use [`with_read_lock`](crate::with_read_lock) and
/// [`with_write_lock`](crate::with_write_lock).
///
/// Acquisition futures resolve to `()` and never fail; when the lock is
/// unavailable they queue in arrival order (see the [module docs](self)
/// for the fairness rules).
///
/// The wait queue is unbounded. All state transitions happen under an
/// internal mutex that is never held across a suspension point, so the
/// primitive is `Send + Sync` and usable from any executor, though it is
/// designed for cooperative single-executor scheduling.
#[derive(Debug, Default)]
pub struct RwMutex {
    state: ParkingMutex<State>,
}

impl RwMutex {
    /// Creates a new unlocked mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a read lock, waiting if a writer holds the lock or is
    /// queued for it.
    ///
    /// Readers that arrive while a write request is queued wait behind
    /// that writer even though the lock itself may only be read-held.
    pub fn read_lock(&self) -> ReadLockFuture<'_> {
        ReadLockFuture {
            lock: self,
            waiter_id: None,
            done: false,
        }
    }

    /// Releases one read lock.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::ReadNotHeld`] when no reader holds
    /// the lock — an unbalanced release, always a caller bug.
    pub fn read_unlock(&self) -> Result<(), InvariantViolation> {
        let woken = {
            let mut state = self.state.lock();
            if state.readers == 0 {
                return Err(InvariantViolation::ReadNotHeld);
            }
            state.readers -= 1;
            if state.readers == 0 {
                state.grant_pass()
            } else {
                WakerBatch::new()
            }
        };
        for waker in woken {
            waker.wake();
        }
        Ok(())
    }

    /// Acquires the write lock, waiting until it is exclusive.
    pub fn write_lock(&self) -> WriteLockFuture<'_> {
        WriteLockFuture {
            lock: self,
            waiter_id: None,
            done: false,
        }
    }

    /// Releases the write lock.
    ///
    /// Ownership handoff to queued waiters is deferred: immediately after
    /// this call returns, [`state`](Self::state) reports the lock as
    /// unlocked; the selected waiter takes over on its next poll.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation::WriteNotHeld`] when no writer holds
    /// the lock.
    pub fn write_unlock(&self) -> Result<(), InvariantViolation> {
        let woken = {
            let mut state = self.state.lock();
            if !state.writer_held {
                return Err(InvariantViolation::WriteNotHeld);
            }
            state.writer_held = false;
            state.grant_pass()
        };
        for waker in woken {
            waker.wake();
        }
        Ok(())
    }

    /// Returns the current observable state of the lock.
    #[must_use]
    pub fn state(&self) -> LockState {
        let state = self.state.lock();
        if state.writer_held {
            LockState::WriteLocked
        } else if state.readers > 0 {
            LockState::ReadLocked
        } else {
            LockState::Unlocked
        }
    }

    /// Number of write requests currently queued.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.state
            .lock()
            .queue
            .iter()
            .filter(|w| w.kind == WaitKind::Write)
            .count()
    }

    /// True if any write request is queued.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.state.lock().has_queued_writer()
    }

    /// True if any read request is queued.
    #[must_use]
    pub fn has_pending_reads(&self) -> bool {
        self.state
            .lock()
            .queue
            .iter()
            .any(|w| w.kind == WaitKind::Read)
    }

    #[cfg(test)]
    fn debug_state(&self) -> State {
        self.state.lock().clone()
    }
}

/// Future returned by [`RwMutex::read_lock`]. Resolves to `()`.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct ReadLockFuture<'a> {
    lock: &'a RwMutex,
    waiter_id: Option<u64>,
    done: bool,
}

impl Future for ReadLockFuture<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<()> {
        let mut state = self.lock.state.lock();
        match self.waiter_id {
            None => {
                if !state.writer_held && !state.handoff_writer && !state.has_queued_writer() {
                    state.readers += 1;
                    drop(state);
                    self.done = true;
                    return Poll::Ready(());
                }
                let id = state.enqueue(WaitKind::Read, context.waker().clone());
                drop(state);
                self.waiter_id = Some(id);
                Poll::Pending
            }
            Some(id) => {
                if let Some(waiter) = state.queue.iter_mut().find(|w| w.id == id) {
                    if !waiter.waker.will_wake(context.waker()) {
                        waiter.waker.clone_from(context.waker());
                    }
                    return Poll::Pending;
                }
                // Dequeued by a grant pass: claim the handoff.
                state.handoff_readers = state.handoff_readers.saturating_sub(1);
                state.readers += 1;
                drop(state);
                self.done = true;
                Poll::Ready(())
            }
        }
    }
}

impl Drop for ReadLockFuture<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(id) = self.waiter_id else { return };
        let woken = {
            let mut state = self.lock.state.lock();
            if let Some(pos) = state.position(id) {
                state.queue.remove(pos);
            } else {
                // Granted but never claimed: hand the grant back.
                state.handoff_readers = state.handoff_readers.saturating_sub(1);
            }
            state.grant_pass()
        };
        for waker in woken {
            waker.wake();
        }
    }
}

/// Future returned by [`RwMutex::write_lock`]. Resolves to `()`.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct WriteLockFuture<'a> {
    lock: &'a RwMutex,
    waiter_id: Option<u64>,
    done: bool,
}

impl Future for WriteLockFuture<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<()> {
        let mut state = self.lock.state.lock();
        match self.waiter_id {
            None => {
                if state.idle() {
                    state.writer_held = true;
                    drop(state);
                    self.done = true;
                    return Poll::Ready(());
                }
                let id = state.enqueue(WaitKind::Write, context.waker().clone());
                drop(state);
                self.waiter_id = Some(id);
                Poll::Pending
            }
            Some(id) => {
                if let Some(waiter) = state.queue.iter_mut().find(|w| w.id == id) {
                    if !waiter.waker.will_wake(context.waker()) {
                        waiter.waker.clone_from(context.waker());
                    }
                    return Poll::Pending;
                }
                // Dequeued by a grant pass: claim the handoff.
                state.handoff_writer = false;
                state.writer_held = true;
                drop(state);
                self.done = true;
                Poll::Ready(())
            }
        }
    }
}

impl Drop for WriteLockFuture<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(id) = self.waiter_id else { return };
        let woken = {
            let mut state = self.lock.state.lock();
            if let Some(pos) = state.position(id) {
                state.queue.remove(pos);
            } else {
                // Granted but never claimed: hand the grant back.
                state.handoff_writer = false;
            }
            // A vanished write request can unblock readers queued behind it.
            state.grant_pass()
        };
        for waker in woken {
            waker.wake();
        }
    }
}
