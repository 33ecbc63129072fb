//! Latch - lifecycle state machine with observable transitions
//!
//! The lifecycle is:
//!
//! ```text
//! Stopped -> Starting -> Started -> Stopping -> Stopped
//! ```
//!
//! Each transition bumps a per-state epoch. A `notify_*` future captures the epoch at call
//! time and resolves once the latch is in that state or has entered it since, so a waiter
//! never misses a transition that happens between subscribing and polling.

use std::fmt;
use std::future::Future;

use tokio::sync::watch;

/// Latch state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LatchState {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl LatchState {
    fn index(self) -> usize {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Started => 2,
            Self::Stopping => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Transitions {
    state: LatchState,
    epochs: [u64; 4],
}

impl Transitions {
    fn enter(&mut self, next: LatchState) {
        self.state = next;
        self.epochs[next.index()] += 1;
    }

    fn reached(&self, target: LatchState, seen: u64) -> bool {
        self.state == target || self.epochs[target.index()] > seen
    }
}

/// Lifecycle coordinator for a single component
pub struct Latch {
    tx: watch::Sender<Transitions>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Transitions::default());
        Self { tx }
    }

    pub fn state(&self) -> LatchState {
        self.tx.borrow().state
    }

    pub fn can_start(&self) -> bool {
        self.state() == LatchState::Stopped
    }

    pub fn can_stop(&self) -> bool {
        self.state() == LatchState::Started
    }

    pub fn is_starting(&self) -> bool {
        self.state() == LatchState::Starting
    }

    pub fn is_started(&self) -> bool {
        self.state() == LatchState::Started
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == LatchState::Stopping
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == LatchState::Stopped
    }

    /// Signal the latch is starting
    pub fn starting(&self) {
        self.enter(LatchState::Starting);
    }

    /// Signal the latch has started
    pub fn started(&self) {
        self.enter(LatchState::Started);
    }

    /// Signal the latch to stop
    pub fn stopping(&self) {
        self.enter(LatchState::Stopping);
    }

    /// Signal the latch has stopped
    pub fn stopped(&self) {
        self.enter(LatchState::Stopped);
    }

    /// Atomically move `from -> to`; returns false if the latch was not in `from`
    pub fn transition(&self, from: LatchState, to: LatchState) -> bool {
        let mut moved = false;
        self.tx.send_if_modified(|t| {
            if t.state != from {
                return false;
            }
            t.enter(to);
            moved = true;
            true
        });
        moved
    }

    pub fn notify_starting(&self) -> impl Future<Output = ()> + Send + 'static {
        self.notify(LatchState::Starting)
    }

    pub fn notify_started(&self) -> impl Future<Output = ()> + Send + 'static {
        self.notify(LatchState::Started)
    }

    pub fn notify_stopping(&self) -> impl Future<Output = ()> + Send + 'static {
        self.notify(LatchState::Stopping)
    }

    pub fn notify_stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        self.notify(LatchState::Stopped)
    }

    fn notify(&self, target: LatchState) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        let seen = rx.borrow().epochs[target.index()];
        async move {
            loop {
                if rx.borrow_and_update().reached(target, seen) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    fn enter(&self, next: LatchState) {
        self.tx.send_if_modified(|t| {
            if t.state == next {
                return false;
            }
            t.enter(next);
            true
        });
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch").field("state", &self.state()).finish()
    }
}
