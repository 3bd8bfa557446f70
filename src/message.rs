//! Commands, driver events, and the unified queue message.
//!
//! The public API produces [`Command`]s, the driver callbacks produce
//! [`Event`]s, and both travel through the same bounded queue as
//! [`Message`]s so the worker observes them in arrival order.

/// Actions requested through the public API, plus the internal `Exit`
/// command that terminates the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Start = 0,
    Stop = 1,
    Connect = 2,
    Disconnect = 3,
    /// Worker shutdown request. Posted by `deinit` only, never by users.
    Exit = 4,
}

impl Command {
    /// Number of commands — sizes the legality table.
    pub const COUNT: usize = 5;
}

/// Signals reported by the WiFi driver and IP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Event {
    StaStart = 0,
    StaStop = 1,
    StaConnected = 2,
    StaDisconnected = 3,
    GotIp = 4,
    LostIp = 5,
}

impl Event {
    /// Number of events — sizes the transition table.
    pub const COUNT: usize = 6;
}

/// Unified queue message: either a user command or a driver event.
///
/// `reason` and `rssi` are only meaningful for `StaDisconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    Event { event: Event, reason: u8, rssi: i8 },
}

impl Message {
    /// Convenience constructor for events without a disconnect payload.
    pub fn event(event: Event) -> Self {
        Self::Event {
            event,
            reason: 0,
            rssi: 0,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Disconnect reason codes
// ───────────────────────────────────────────────────────────────

/// Driver disconnect reason codes the manager recognizes. Values match the
/// ESP-IDF `wifi_err_reason_t` constants; unknown codes fall into the
/// recoverable-default branch.
pub mod reason {
    /// The station left the AP deliberately (driver-initiated disconnect).
    pub const ASSOC_LEAVE: u8 = 8;
    /// WPA 4-way handshake timed out — classic wrong-passphrase symptom.
    pub const FOUR_WAY_HANDSHAKE_TIMEOUT: u8 = 15;
    /// 802.1X authentication failed.
    pub const IEEE_802_1X_AUTH_FAILED: u8 = 23;
    /// No AP with the configured SSID was found.
    pub const NO_AP_FOUND: u8 = 201;
    /// Authentication rejected by the AP.
    pub const AUTH_FAIL: u8 = 202;
    /// Handshake timed out.
    pub const HANDSHAKE_TIMEOUT: u8 = 204;
    /// Generic connection failure, ambiguous between bad credentials and
    /// bad signal.
    pub const CONNECTION_FAIL: u8 = 205;

    /// Reasons that are ambiguous between "wrong credentials" and "poor
    /// signal". These feed the RSSI-tiered strike counter instead of
    /// invalidating credentials outright.
    pub fn is_suspect(code: u8) -> bool {
        matches!(
            code,
            AUTH_FAIL
                | IEEE_802_1X_AUTH_FAILED
                | FOUR_WAY_HANDSHAKE_TIMEOUT
                | HANDSHAKE_TIMEOUT
                | CONNECTION_FAIL
        )
    }
}
