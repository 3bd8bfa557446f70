//! Synchronization primitives: the unified message queue and the
//! outcome-bit group.
//!
//! These are the rendezvous points between three kinds of context:
//!
//! ```text
//! ┌──────────────┐              ┌───────────────┐
//! │ API callers  │──Command──▶  │               │
//! │ (any thread) │              │ MessageQueue  │──▶ worker (sole consumer)
//! │ Driver       │──Event────▶  │ (bounded, 10) │
//! │ callbacks    │              └───────────────┘
//! └──────────────┘
//!        ▲                      ┌───────────────┐
//!        └──────wait(mask)──────│   SyncBits    │◀── set()/clear() by worker
//!                               └───────────────┘
//! ```
//!
//! Enqueue policy: synchronous API callers block for a slot, asynchronous
//! callers and driver callbacks use the non-blocking push and may be
//! refused when the queue is full. The receive side supports an indefinite
//! wait and a timed wait so the worker can sleep exactly until the next
//! reconnect deadline.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::message::Message;

/// Queue depth. Ten pending messages is ample: commands are processed in
/// well under a driver-event round trip, and the driver never bursts more
/// than a handful of events.
pub const QUEUE_DEPTH: usize = 10;

/// Outcome bits used for API-to-worker rendezvous. A blocking caller
/// clears its command's subset, enqueues, then waits for any of them.
pub mod bits {
    /// Driver started.
    pub const STARTED: u32 = 1 << 0;
    /// Driver stopped.
    pub const STOPPED: u32 = 1 << 1;
    /// Associated and got an IP address.
    pub const CONNECTED: u32 = 1 << 2;
    /// Disconnected from the AP.
    pub const DISCONNECTED: u32 = 1 << 3;
    /// Connection attempt failed.
    pub const CONNECT_FAILED: u32 = 1 << 4;
    /// Driver start failed.
    pub const START_FAILED: u32 = 1 << 5;
    /// Driver stop failed.
    pub const STOP_FAILED: u32 = 1 << 6;
    /// Command rejected: illegal in the current state.
    pub const INVALID_STATE: u32 = 1 << 7;

    /// Every outcome bit.
    pub const ALL: u32 = STARTED
        | STOPPED
        | CONNECTED
        | DISCONNECTED
        | CONNECT_FAILED
        | START_FAILED
        | STOP_FAILED
        | INVALID_STATE;
}

/// Recover the guard from a poisoned lock. A panicking thread must not
/// wedge every other caller of the manager.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ───────────────────────────────────────────────────────────────
// Message queue
// ───────────────────────────────────────────────────────────────

/// Bounded multi-producer single-consumer FIFO for [`Message`]s.
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_DEPTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Non-blocking push. Refused with [`Error::Failed`] when full — the
    /// async-API and driver-callback enqueue path.
    pub fn try_send(&self, msg: Message) -> Result<()> {
        let mut q = lock(&self.inner);
        if q.len() >= self.capacity {
            return Err(Error::Failed);
        }
        q.push_back(msg);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking push — the synchronous-API enqueue path. Waits for a free
    /// slot indefinitely.
    pub fn send(&self, msg: Message) {
        let mut q = lock(&self.inner);
        while q.len() >= self.capacity {
            q = self.not_full.wait(q).unwrap_or_else(|e| e.into_inner());
        }
        q.push_back(msg);
        self.not_empty.notify_one();
    }

    /// Push with a bounded wait for a free slot.
    pub fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut q = lock(&self.inner);
        while q.len() >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (guard, _) = self
                .not_full
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            q = guard;
        }
        q.push_back(msg);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking receive. Only the worker calls this.
    pub fn recv(&self) -> Message {
        let mut q = lock(&self.inner);
        loop {
            if let Some(msg) = q.pop_front() {
                self.not_full.notify_one();
                return msg;
            }
            q = self.not_empty.wait(q).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Receive with a deadline; `None` on timeout. The worker uses this
    /// while a reconnect backoff is armed.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut q = lock(&self.inner);
        loop {
            if let Some(msg) = q.pop_front() {
                self.not_full.notify_one();
                return Some(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            q = guard;
        }
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Outcome-bit group
// ───────────────────────────────────────────────────────────────

/// An event-group analog: a set of bits with set / clear / wait-any.
///
/// `wait` returns the intersection of the mask and the bits set at the
/// wake instant, clearing exactly the bits it returns. Bits outside the
/// mask are untouched, so concurrent waiters on disjoint masks do not
/// steal each other's wakeups.
pub struct SyncBits {
    state: Mutex<u32>,
    cond: Condvar,
}

impl SyncBits {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Set bits and wake all waiters.
    pub fn set(&self, mask: u32) {
        let mut state = lock(&self.state);
        *state |= mask;
        self.cond.notify_all();
    }

    /// Clear bits without waking anyone.
    pub fn clear(&self, mask: u32) {
        let mut state = lock(&self.state);
        *state &= !mask;
    }

    /// Current snapshot, for diagnostics.
    pub fn get(&self) -> u32 {
        *lock(&self.state)
    }

    /// Wait until any bit in `mask` is set, clear the observed subset, and
    /// return it. Returns 0 on timeout.
    pub fn wait(&self, mask: u32, timeout: Duration) -> u32 {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            let hit = *state & mask;
            if hit != 0 {
                *state &= !hit;
                return hit;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}

impl Default for SyncBits {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Combined channel
// ───────────────────────────────────────────────────────────────

/// The queue and outcome bits created together at `init` and torn down
/// together at `deinit`.
pub struct SyncChannel {
    pub queue: MessageQueue,
    pub bits: SyncBits,
}

impl SyncChannel {
    pub fn new() -> Self {
        Self {
            queue: MessageQueue::new(),
            bits: SyncBits::new(),
        }
    }
}

impl Default for SyncChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
