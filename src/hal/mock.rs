//! Scripted simulation driver for host-side tests.
//!
//! Mirrors the real driver's observable behavior: operations succeed or
//! fail according to per-operation switches, and the `auto_*` switches
//! emit the driver events a healthy network would produce, through the
//! same [`EventSender`] path the real callbacks use. Tests can also grab
//! the sender and inject arbitrary event sequences (wrong-password
//! disconnects, signal loss, early IP) by hand.
//!
//! Like the real driver, `disconnect` only reports a disconnection when an
//! association actually exists — a disconnect against a link that never
//! came up is silent.

use std::sync::Mutex;
use std::time::Duration;

use log::info;

use super::{DriverHal, EventSender, StaConfig};
use crate::error::{Error, Result};
use crate::message::{reason, Event};

/// Per-operation scripting. Defaults model a healthy driver on a healthy
/// network: every operation succeeds and produces its usual event.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// `start()` emits `StaStart`.
    pub auto_start: bool,
    /// `stop()` emits `StaStop`.
    pub auto_stop: bool,
    /// `connect()` emits `StaConnected` followed by `GotIp`.
    pub auto_connect: bool,
    /// `disconnect()` emits `StaDisconnected` with `ASSOC_LEAVE` when an
    /// association exists.
    pub auto_disconnect: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    /// `connect()` sleeps this long before returning, simulating a slow
    /// driver call. Used to observe the worker mid-operation.
    pub connect_block_ms: u64,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            auto_start: true,
            auto_stop: true,
            auto_connect: true,
            auto_disconnect: true,
            fail_start: false,
            fail_stop: false,
            fail_connect: false,
            fail_disconnect: false,
            connect_block_ms: 0,
        }
    }
}

impl Behavior {
    /// A driver that never answers: operations succeed but no event ever
    /// arrives. Exercises the sync-API timeout and rollback paths.
    pub fn silent() -> Self {
        Self {
            auto_start: false,
            auto_stop: false,
            auto_connect: false,
            auto_disconnect: false,
            ..Self::default()
        }
    }

    /// A healthy driver on a network where association never completes.
    pub fn no_network() -> Self {
        Self {
            auto_connect: false,
            ..Self::default()
        }
    }
}

struct MockState {
    sender: Option<EventSender>,
    /// Driver-persisted station config (the driver's own NVS analog):
    /// survives `deinit`, cleared only by `restore`.
    config: StaConfig,
    behavior: Behavior,
    calls: Vec<&'static str>,
    started: bool,
    associated: bool,
}

/// The simulation driver.
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::default())
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            state: Mutex::new(MockState {
                sender: None,
                config: StaConfig::default(),
                behavior,
                calls: Vec::new(),
                started: false,
                associated: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the scripted behavior mid-test.
    pub fn set_behavior(&self, behavior: Behavior) {
        self.lock().behavior = behavior;
    }

    /// The sender registered by the manager, for manual event injection.
    ///
    /// Panics if called before `register_event_handlers` — a test ordering
    /// bug, not a runtime condition.
    pub fn events(&self) -> EventSender {
        self.lock()
            .sender
            .clone()
            .expect("event handlers not registered yet")
    }

    /// Names of every operation invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// How many times `op` was invoked.
    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|&&c| c == op).count()
    }

    fn record(&self, op: &'static str) {
        self.lock().calls.push(op);
    }

    fn emit(&self, event: Event, reason: u8, rssi: i8) {
        let sender = self.lock().sender.clone();
        if let Some(sender) = sender {
            sender.push(event, reason, rssi);
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverHal for MockDriver {
    fn init_netif(&self) -> Result<()> {
        self.record("init_netif");
        Ok(())
    }

    fn create_default_event_loop(&self) -> Result<()> {
        self.record("create_default_event_loop");
        Ok(())
    }

    fn setup_sta_netif(&self) -> Result<()> {
        self.record("setup_sta_netif");
        Ok(())
    }

    fn init_wifi(&self) -> Result<()> {
        self.record("init_wifi");
        Ok(())
    }

    fn set_mode_sta(&self) -> Result<()> {
        self.record("set_mode_sta");
        Ok(())
    }

    fn deinit(&self) -> Result<()> {
        self.record("deinit");
        let mut state = self.lock();
        state.started = false;
        state.associated = false;
        Ok(())
    }

    fn register_event_handlers(&self, events: EventSender) -> Result<()> {
        self.record("register_event_handlers");
        self.lock().sender = Some(events);
        Ok(())
    }

    fn unregister_event_handlers(&self) -> Result<()> {
        self.record("unregister_event_handlers");
        self.lock().sender = None;
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.record("start");
        let behavior = self.lock().behavior.clone();
        if behavior.fail_start {
            return Err(Error::Failed);
        }
        self.lock().started = true;
        if behavior.auto_start {
            self.emit(Event::StaStart, 0, 0);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.record("stop");
        let behavior = self.lock().behavior.clone();
        if behavior.fail_stop {
            return Err(Error::Failed);
        }
        {
            let mut state = self.lock();
            state.started = false;
            state.associated = false;
        }
        if behavior.auto_stop {
            self.emit(Event::StaStop, 0, 0);
        }
        Ok(())
    }

    fn connect(&self) -> Result<()> {
        self.record("connect");
        let behavior = self.lock().behavior.clone();
        if behavior.connect_block_ms > 0 {
            std::thread::sleep(Duration::from_millis(behavior.connect_block_ms));
        }
        if behavior.fail_connect {
            return Err(Error::Failed);
        }
        if behavior.auto_connect {
            info!("mock: association + DHCP succeed");
            self.lock().associated = true;
            self.emit(Event::StaConnected, 0, 0);
            self.emit(Event::GotIp, 0, 0);
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.record("disconnect");
        let behavior = self.lock().behavior.clone();
        if behavior.fail_disconnect {
            return Err(Error::Failed);
        }
        let was_associated = {
            let mut state = self.lock();
            let was = state.associated;
            state.associated = false;
            was
        };
        if behavior.auto_disconnect && was_associated {
            self.emit(Event::StaDisconnected, reason::ASSOC_LEAVE, -50);
        }
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        self.record("restore");
        self.lock().config = StaConfig::default();
        Ok(())
    }

    fn set_config(&self, cfg: &StaConfig) -> Result<()> {
        self.record("set_config");
        self.lock().config = cfg.clone();
        Ok(())
    }

    fn get_config(&self) -> Result<StaConfig> {
        self.record("get_config");
        Ok(self.lock().config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::sync::SyncChannel;
    use std::sync::Arc;

    fn wired() -> (MockDriver, Arc<SyncChannel>) {
        let mock = MockDriver::new();
        let channel = Arc::new(SyncChannel::new());
        mock.register_event_handlers(EventSender::new(Arc::clone(&channel)))
            .unwrap();
        (mock, channel)
    }

    #[test]
    fn auto_start_emits_sta_start() {
        let (mock, channel) = wired();
        mock.start().unwrap();
        assert_eq!(
            channel.queue.recv_timeout(Duration::ZERO),
            Some(Message::event(Event::StaStart))
        );
    }

    #[test]
    fn silent_driver_emits_nothing() {
        let (mock, channel) = wired();
        mock.set_behavior(Behavior::silent());
        mock.start().unwrap();
        mock.connect().unwrap();
        assert!(channel.queue.is_empty());
    }

    #[test]
    fn failed_ops_emit_nothing() {
        let (mock, channel) = wired();
        mock.set_behavior(Behavior {
            fail_connect: true,
            ..Behavior::default()
        });
        assert_eq!(mock.connect(), Err(Error::Failed));
        assert!(channel.queue.is_empty());
    }

    #[test]
    fn disconnect_without_association_is_silent() {
        let (mock, channel) = wired();
        mock.start().unwrap();
        let _ = channel.queue.recv_timeout(Duration::ZERO);
        mock.disconnect().unwrap();
        assert!(channel.queue.is_empty());
    }

    #[test]
    fn disconnect_after_association_reports_leave() {
        let (mock, channel) = wired();
        mock.start().unwrap();
        mock.connect().unwrap();
        while channel.queue.recv_timeout(Duration::ZERO).is_some() {}
        mock.disconnect().unwrap();
        assert_eq!(
            channel.queue.recv_timeout(Duration::ZERO),
            Some(Message::Event {
                event: Event::StaDisconnected,
                reason: reason::ASSOC_LEAVE,
                rssi: -50,
            })
        );
    }

    #[test]
    fn config_survives_deinit_but_not_restore() {
        let (mock, _channel) = wired();
        let cfg = StaConfig::for_credentials("Net", "password1");
        mock.set_config(&cfg).unwrap();
        mock.deinit().unwrap();
        assert_eq!(mock.get_config().unwrap().ssid.as_str(), "Net");
        mock.restore().unwrap();
        assert_eq!(mock.get_config().unwrap().ssid.as_str(), "");
    }

    #[test]
    fn call_log_records_in_order() {
        let (mock, _channel) = wired();
        mock.start().unwrap();
        mock.connect().unwrap();
        let calls = mock.calls();
        assert_eq!(calls[calls.len() - 2..], ["start", "connect"]);
        assert_eq!(mock.call_count("start"), 1);
    }
}
