//! WiFi driver hardware abstraction.
//!
//! [`DriverHal`] is the injectable boundary between the manager and the
//! platform driver.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF driver calls in [`esp`].
//! - **all other targets**: the scripted simulation driver in [`mock`],
//!   used by host-side tests.
//!
//! All operations are called from the worker (or from API paths that hold
//! the state lock); implementations may block briefly but must never call
//! back into the manager. Driver events flow the other way, through the
//! [`EventSender`] handed over in `register_event_handlers` — callbacks
//! borrow the queue handle, never the manager.

#[cfg(target_os = "espidf")]
pub mod esp;
#[cfg(not(target_os = "espidf"))]
pub mod mock;

use std::sync::Arc;

use log::warn;

use crate::error::Result;
use crate::message::{Event, Message};
use crate::sync::SyncChannel;

// ───────────────────────────────────────────────────────────────
// Station configuration
// ───────────────────────────────────────────────────────────────

/// Scan strategy when searching for the configured SSID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMethod {
    /// Stop at the first match.
    Fast,
    /// Scan every channel and pick the best AP.
    #[default]
    AllChannel,
}

/// Minimum auth mode the station will accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthThreshold {
    Open,
    #[default]
    Wpa2Psk,
}

/// Station configuration as stored in the driver.
///
/// SSIDs are bounded at 32 bytes and passwords at 64 bytes, the 802.11
/// limits; [`bounded`] enforces this on input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
    pub scan_method: ScanMethod,
    pub auth_threshold: AuthThreshold,
    pub pmf_capable: bool,
    pub pmf_required: bool,
    /// Driver-internal retry budget. Zero: the manager owns all retry
    /// policy, the driver reports every failure immediately.
    pub failure_retry_cnt: u8,
}

impl StaConfig {
    /// Canonical config for a credential pair: all-channel scan, WPA2-PSK
    /// threshold, PMF capable but not required, no driver-side retries.
    pub fn for_credentials(ssid: &str, password: &str) -> Self {
        Self {
            ssid: bounded(ssid),
            password: bounded(password),
            scan_method: ScanMethod::AllChannel,
            auth_threshold: AuthThreshold::Wpa2Psk,
            pmf_capable: true,
            pmf_required: false,
            failure_retry_cnt: 0,
        }
    }
}

/// Truncate `s` to at most `N` bytes, on a character boundary.
pub fn bounded<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

// ───────────────────────────────────────────────────────────────
// Event delivery handle
// ───────────────────────────────────────────────────────────────

/// Queue handle handed to the driver's event callbacks.
///
/// The push is non-blocking and safe from interrupt-like contexts; a full
/// queue drops the event with a warning rather than stalling the driver.
#[derive(Clone)]
pub struct EventSender {
    channel: Arc<SyncChannel>,
}

impl EventSender {
    pub(crate) fn new(channel: Arc<SyncChannel>) -> Self {
        Self { channel }
    }

    /// Enqueue a driver event. Returns `false` if the queue was full.
    pub fn push(&self, event: Event, reason: u8, rssi: i8) -> bool {
        let ok = self
            .channel
            .queue
            .try_send(Message::Event { event, reason, rssi })
            .is_ok();
        if !ok {
            warn!("event queue full, dropping {event:?}");
        }
        ok
    }

    /// Enqueue an event that carries no disconnect payload.
    pub fn push_event(&self, event: Event) -> bool {
        self.push(event, 0, 0)
    }

    /// Number of messages waiting in the queue, for diagnostics.
    pub fn pending(&self) -> usize {
        self.channel.queue.len()
    }
}

// ───────────────────────────────────────────────────────────────
// Driver trait
// ───────────────────────────────────────────────────────────────

/// The driver operations the manager consumes.
///
/// Bring-up operations (`init_netif` through `set_mode_sta`) must treat the
/// platform's "already initialized" answers as success so a second `init`
/// after an unrelated component brought the stack up is idempotent.
pub trait DriverHal: Send + Sync {
    // ── Lifecycle ─────────────────────────────────────────────
    fn init_netif(&self) -> Result<()>;
    fn create_default_event_loop(&self) -> Result<()>;
    fn setup_sta_netif(&self) -> Result<()>;
    fn init_wifi(&self) -> Result<()>;
    fn set_mode_sta(&self) -> Result<()>;
    fn deinit(&self) -> Result<()>;

    // ── Event registration ────────────────────────────────────
    /// Register the WiFi and IP event callbacks, handing them `events` as
    /// their only channel back into the manager.
    fn register_event_handlers(&self, events: EventSender) -> Result<()>;
    fn unregister_event_handlers(&self) -> Result<()>;

    // ── Operations ────────────────────────────────────────────
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn connect(&self) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    /// Restore driver defaults, erasing the driver-persisted config.
    fn restore(&self) -> Result<()>;

    // ── Config ────────────────────────────────────────────────
    fn set_config(&self, cfg: &StaConfig) -> Result<()>;
    fn get_config(&self) -> Result<StaConfig>;
}
