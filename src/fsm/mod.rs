//! Table-driven finite state machine for the station lifecycle.
//!
//! Classic embedded FSM pattern: every decision is a lookup in a static
//! 2-D table, never a nested `match` on both axes.
//!
//! ```text
//!  UNINITIALIZED ──init──▶ INITIALIZING ──▶ INITIALIZED ◀──STA_STOP── STOPPING
//!                                              │ START                    ▲
//!                                              ▼                          │ STOP
//!                                          STARTING ──STA_START──▶ STARTED ──CONNECT──▶ CONNECTING
//!                                              │ STA_DISCONNECTED            │               │ STA_CONNECTED
//!                                              ▼ (driver refused)           │               ▼
//!                                          INITIALIZED          DISCONNECTING ◀── CONNECTED_NO_IP ──GOT_IP──▶ CONNECTED_GOT_IP
//!                                                                                         │                        │
//!                                                                        STA_DISCONNECTED │                        │ STA_DISCONNECTED
//!                                                                                         ▼                        ▼
//!                                                             ERROR_CREDENTIALS ◀──strikes── WAITING_RECONNECT ◀───┘
//! ```
//!
//! Two aliases are part of the public contract: `DISCONNECTED` is the same
//! state as `STARTED` (driver powered, not associated) and `STOPPED` is the
//! same state as `INITIALIZED` (driver powered off, manager alive).
//!
//! The tables live in [`tables`]; this module owns the mutable bookkeeping
//! (retry counters, backoff deadline) and the pure queries the worker and
//! the public API share.

pub mod tables;

use std::time::Duration;

use log::debug;

use crate::message::{Command, Event};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Lifecycle states. Discriminants index the static tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Starting = 3,
    Started = 4,
    Connecting = 5,
    ConnectedNoIp = 6,
    ConnectedGotIp = 7,
    Disconnecting = 8,
    WaitingReconnect = 9,
    ErrorCredentials = 10,
    Stopping = 11,
}

impl State {
    /// Total number of states — sizes the table arrays.
    pub const COUNT: usize = 12;

    /// Driver powered and idle: not associated with any AP.
    pub const DISCONNECTED: State = State::Started;

    /// Driver powered off but the manager is still alive.
    pub const STOPPED: State = State::Initialized;

    /// Every state, for exhaustive table walks in tests.
    pub const ALL: [State; Self::COUNT] = [
        State::Uninitialized,
        State::Initializing,
        State::Initialized,
        State::Starting,
        State::Started,
        State::Connecting,
        State::ConnectedNoIp,
        State::ConnectedGotIp,
        State::Disconnecting,
        State::WaitingReconnect,
        State::ErrorCredentials,
        State::Stopping,
    ];

    fn props(self) -> &'static StateProps {
        &tables::STATE_PROPS[self as usize]
    }

    /// Driver-level activity in progress (start requested through stop
    /// completed).
    pub fn is_active(self) -> bool {
        self.props().is_active
    }

    /// An L2 association is present.
    pub fn is_connected(self) -> bool {
        self.props().is_connected
    }

    /// Driver is up and ready to accept connect/disconnect commands.
    pub fn is_sta_ready(self) -> bool {
        self.props().is_sta_ready
    }
}

// ---------------------------------------------------------------------------
// Table cell types
// ---------------------------------------------------------------------------

/// What the command-legality table says about a `(state, command)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Dispatch to the handler: transition to the "ING" state and call the
    /// driver.
    Execute,
    /// Idempotent no-op: report success without touching the driver.
    Skip,
    /// Illegal in this state.
    Error,
}

/// One cell of the event-transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOutcome {
    pub next: State,
    /// Outcome bits the worker sets alongside the transition.
    pub bits: u32,
}

/// Derived per-state properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateProps {
    pub is_active: bool,
    pub is_connected: bool,
    pub is_sta_ready: bool,
}

/// Pure table lookup: is `cmd` legal in `state`, and how is it handled?
pub fn validate_command(state: State, cmd: Command) -> Action {
    tables::COMMAND_MATRIX[state as usize][cmd as usize]
}

/// Pure table lookup: where does `event` take `state`, and which bits fire?
pub fn resolve_event(state: State, event: Event) -> EventOutcome {
    tables::TRANSITION_MATRIX[state as usize][event as usize]
}

// ---------------------------------------------------------------------------
// Signal quality tiers
// ---------------------------------------------------------------------------

/// Strong signal: a suspect failure is almost certainly a credential issue.
pub const RSSI_THRESHOLD_GOOD: i8 = -55;
/// Moderate signal: the failure cause is ambiguous.
pub const RSSI_THRESHOLD_MEDIUM: i8 = -67;
/// Weak signal: probably a connectivity issue.
pub const RSSI_THRESHOLD_WEAK: i8 = -80;

/// Strikes tolerated before credentials are declared bad, per tier.
pub const STRIKE_LIMIT_GOOD: u32 = 1;
pub const STRIKE_LIMIT_MEDIUM: u32 = 2;
pub const STRIKE_LIMIT_WEAK: u32 = 5;

/// RSSI band at the moment of a suspect disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTier {
    Good,
    Medium,
    Weak,
    /// Below the weak threshold: always assume a signal problem and keep
    /// retrying, no matter how many strikes accumulate.
    Critical,
}

impl SignalTier {
    pub fn classify(rssi: i8) -> Self {
        if rssi >= RSSI_THRESHOLD_GOOD {
            Self::Good
        } else if rssi >= RSSI_THRESHOLD_MEDIUM {
            Self::Medium
        } else if rssi >= RSSI_THRESHOLD_WEAK {
            Self::Weak
        } else {
            Self::Critical
        }
    }

    /// Strike limit for the tier; `None` means never invalidate.
    pub fn strike_limit(self) -> Option<u32> {
        match self {
            Self::Good => Some(STRIKE_LIMIT_GOOD),
            Self::Medium => Some(STRIKE_LIMIT_MEDIUM),
            Self::Weak => Some(STRIKE_LIMIT_WEAK),
            Self::Critical => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff parameters
// ---------------------------------------------------------------------------

/// Exponent cap: 2^8 s keeps the shift well away from overflow.
pub const MAX_BACKOFF_EXPONENT: u32 = 8;
/// Absolute ceiling on the reconnect delay (5 minutes).
pub const MAX_BACKOFF_MS: u32 = 300_000;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// The FSM's mutable core. Owned by the manager behind its state lock;
/// only the worker mutates it.
pub struct StateMachine {
    current: State,
    retry_count: u32,
    suspect_retry_count: u32,
    next_reconnect_ms: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: State::Uninitialized,
            retry_count: 0,
            suspect_retry_count: 0,
            next_reconnect_ms: 0,
        }
    }

    pub fn state(&self) -> State {
        self.current
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn suspect_retry_count(&self) -> u32 {
        self.suspect_retry_count
    }

    /// Absolute deadline (monotonic ms) of the armed reconnect attempt.
    pub fn next_reconnect_ms(&self) -> u64 {
        self.next_reconnect_ms
    }

    pub fn is_active(&self) -> bool {
        self.current.is_active()
    }

    pub fn is_sta_ready(&self) -> bool {
        self.current.is_sta_ready()
    }

    /// Legality of `cmd` in the current state.
    pub fn validate_command(&self, cmd: Command) -> Action {
        validate_command(self.current, cmd)
    }

    /// Transition decision for `event` in the current state.
    pub fn resolve_event(&self, event: Event) -> EventOutcome {
        resolve_event(self.current, event)
    }

    pub fn transition_to(&mut self, next: State) {
        if next != self.current {
            debug!("state {:?} -> {:?}", self.current, next);
        }
        self.current = next;
    }

    /// An explicit user action cancels the reconnection campaign.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
        self.suspect_retry_count = 0;
    }

    /// Record a suspect (credentials-or-signal) failure at the given RSSI.
    ///
    /// Returns `true` when the tier's strike limit is exhausted; the FSM is
    /// then already in [`State::ErrorCredentials`] and the caller must
    /// persist the invalidation.
    pub fn handle_suspect_failure(&mut self, rssi: i8) -> bool {
        self.suspect_retry_count += 1;
        match SignalTier::classify(rssi).strike_limit() {
            Some(limit) if self.suspect_retry_count >= limit => {
                self.transition_to(State::ErrorCredentials);
                true
            }
            _ => false,
        }
    }

    /// Arm the next reconnect attempt: bump the retry counter, compute the
    /// exponential delay, store the absolute deadline, and enter
    /// [`State::WaitingReconnect`]. Returns the delay in milliseconds.
    pub fn calculate_next_backoff(&mut self, now_ms: u64) -> u32 {
        self.retry_count += 1;
        let exponent = (self.retry_count - 1).min(MAX_BACKOFF_EXPONENT);
        let delay_ms = (1u32 << exponent).saturating_mul(1000).min(MAX_BACKOFF_MS);
        self.next_reconnect_ms = now_ms + u64::from(delay_ms);
        self.transition_to(State::WaitingReconnect);
        delay_ms
    }

    /// How long the worker may sleep on the queue.
    ///
    /// `None` means "indefinitely" — nothing is scheduled. While a backoff
    /// is armed the sleep never exceeds the reconnect deadline; a deadline
    /// already in the past yields a zero duration.
    pub fn wait_duration(&self, now_ms: u64) -> Option<Duration> {
        if self.current != State::WaitingReconnect {
            return None;
        }
        Some(Duration::from_millis(
            self.next_reconnect_ms.saturating_sub(now_ms),
        ))
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
