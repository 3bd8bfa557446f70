//! The manager orchestrator.
//!
//! [`WifiManager`] owns the FSM, the sync primitives, the credential store,
//! and the single worker thread that performs every driver operation.
//!
//! ```text
//!  API threads ──validate──▶ MessageQueue ──▶ worker ──▶ DriverHal
//!      │                          ▲             │
//!      │ wait(bits)               │ events      │ set(bits)
//!      ▼                          │             ▼
//!   SyncBits ◀────────────────────┴──────── StateMachine (under one lock)
//! ```
//!
//! Locking discipline: one non-reentrant mutex guards the state machine.
//! The worker holds it for the whole of a message dispatch (driver calls
//! included — they are short and never call back into the manager); API
//! readers take it only long enough to snapshot the state. Blocking
//! callers never wait on the worker while holding it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::fsm::{self, Action, SignalTier, State, StateMachine};
use crate::hal::{DriverHal, EventSender};
use crate::message::{reason, Command, Event, Message};
use crate::store::{CredentialStore, StoragePort};
use crate::sync::{bits, SyncChannel};
use crate::time;

/// How long `deinit` waits for the worker to acknowledge `EXIT`.
const WORKER_EXIT_GRACE_MS: u64 = 1000;
/// Poll interval while waiting for the worker to exit.
const WORKER_EXIT_POLL_MS: u64 = 10;

// ───────────────────────────────────────────────────────────────
// Outcome-bit wiring per command
// ───────────────────────────────────────────────────────────────

/// The success bit a command's sync caller waits on.
fn success_bit(cmd: Command) -> u32 {
    match cmd {
        Command::Start => bits::STARTED,
        Command::Stop => bits::STOPPED,
        Command::Connect => bits::CONNECTED,
        Command::Disconnect => bits::DISCONNECTED,
        Command::Exit => 0,
    }
}

/// The failure bit paired with each command. Disconnect shares
/// `CONNECT_FAILED` with connect: both wake on a failed link operation.
fn failure_bit(cmd: Command) -> u32 {
    match cmd {
        Command::Start => bits::START_FAILED,
        Command::Stop => bits::STOP_FAILED,
        Command::Connect | Command::Disconnect => bits::CONNECT_FAILED,
        Command::Exit => 0,
    }
}

// ───────────────────────────────────────────────────────────────
// Manager handle
// ───────────────────────────────────────────────────────────────

/// Cloneable handle to the manager. One instance per process is the
/// intended shape — the underlying driver is itself a singleton — but
/// nothing here is hidden global state: callbacks receive the queue
/// handle, never the manager.
#[derive(Clone)]
pub struct WifiManager {
    inner: Arc<Inner>,
}

struct Inner {
    hal: Arc<dyn DriverHal>,
    creds: CredentialStore,
    fsm: Mutex<StateMachine>,
    /// Created at `init`, torn down at `deinit`. `None` means the sync
    /// primitives are missing and every queued API call is rejected.
    sync: Mutex<Option<Arc<SyncChannel>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_exited: AtomicBool,
    cfg: ManagerConfig,
}

impl WifiManager {
    /// Build a manager over the given driver and storage backend. The
    /// manager is inert until [`init`](Self::init).
    pub fn new(
        hal: Arc<dyn DriverHal>,
        storage: Box<dyn StoragePort>,
        cfg: ManagerConfig,
    ) -> Self {
        let creds = CredentialStore::new(Arc::clone(&hal), storage);
        Self {
            inner: Arc::new(Inner {
                hal,
                creds,
                fsm: Mutex::new(StateMachine::new()),
                sync: Mutex::new(None),
                worker: Mutex::new(None),
                worker_exited: AtomicBool::new(false),
                cfg,
            }),
        }
    }

    /// Manager backed by the real ESP-IDF driver and NVS.
    #[cfg(target_os = "espidf")]
    pub fn esp_default(cfg: ManagerConfig) -> Result<Self> {
        let storage = crate::store::NvsStorage::new(&cfg.nvs_namespace)?;
        Ok(Self::new(
            Arc::new(crate::hal::esp::EspDriverHal::new()),
            Box::new(storage),
            cfg,
        ))
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Bring up the driver stack, sync primitives, and worker. Idempotent:
    /// returns `Ok` immediately when already initialized.
    pub fn init(&self) -> Result<()> {
        {
            let mut fsm = self.inner.fsm_lock();
            if fsm.state() != State::Uninitialized {
                info!("already initialized");
                return Ok(());
            }
            fsm.transition_to(State::Initializing);
        }

        if let Err(e) = self.bring_up() {
            error!("init failed ({e}), rolling back");
            let _ = self.deinit();
            return Err(e);
        }

        self.inner.fsm_lock().transition_to(State::Initialized);
        info!("WiFi manager initialized");
        Ok(())
    }

    fn bring_up(&self) -> Result<()> {
        let inner = &self.inner;
        inner.creds.load_valid_flag()?;

        inner.hal.init_netif()?;
        inner.hal.create_default_event_loop()?;
        inner.hal.setup_sta_netif()?;
        inner.hal.init_wifi()?;
        inner.hal.set_mode_sta()?;

        let channel = Arc::new(SyncChannel::new());
        inner
            .hal
            .register_event_handlers(EventSender::new(Arc::clone(&channel)))?;
        *inner.sync_lock() = Some(Arc::clone(&channel));

        inner.creds.ensure_config_fallback(&inner.cfg)?;

        inner.worker_exited.store(false, Ordering::Release);
        let worker_inner = Arc::clone(&self.inner);
        let handle = spawn_worker(inner.cfg.worker_stack_kb, move || {
            worker_loop(worker_inner, channel)
        })?;
        *inner.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Tear everything down. Stops the driver if it is running, terminates
    /// the worker, and releases the sync primitives. Process-global
    /// facilities (default event loop, NVS flash) are left alone.
    pub fn deinit(&self) -> Result<()> {
        let state = self.get_state();
        if state == State::Uninitialized {
            info!("already uninitialized");
            return Ok(());
        }
        info!("deinitializing");

        if state.is_active() {
            let _ = self.stop(Duration::from_secs(2));
        }

        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let posted = match self.inner.channel() {
                Some(channel) => channel
                    .queue
                    .send_timeout(
                        Message::Command(Command::Exit),
                        Duration::from_millis(100),
                    )
                    .is_ok(),
                None => false,
            };
            if posted {
                let mut waited = 0;
                while !self.inner.worker_exited.load(Ordering::Acquire)
                    && waited < WORKER_EXIT_GRACE_MS
                {
                    thread::sleep(Duration::from_millis(WORKER_EXIT_POLL_MS));
                    waited += WORKER_EXIT_POLL_MS;
                }
            }
            if self.inner.worker_exited.load(Ordering::Acquire) {
                let _ = handle.join();
                info!("worker terminated");
            } else {
                // A std thread cannot be force-killed; leave it detached.
                warn!("worker did not exit in time, detaching");
                drop(handle);
            }
        }

        let _ = self.inner.hal.deinit();
        let _ = self.inner.hal.unregister_event_handlers();
        *self.inner.sync_lock() = None;

        self.inner.fsm_lock().transition_to(State::Uninitialized);
        info!("deinitialized");
        Ok(())
    }

    // ── Commands ──────────────────────────────────────────────

    /// Start the driver, blocking until it is up or `timeout` elapses.
    /// A timeout fires an asynchronous `stop` to cancel the attempt.
    pub fn start(&self, timeout: Duration) -> Result<()> {
        self.command_sync(Command::Start, timeout)
    }

    /// Queue a driver start and return immediately.
    pub fn start_async(&self) -> Result<()> {
        self.command_async(Command::Start)
    }

    /// Stop the driver, blocking until it is down or `timeout` elapses.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        self.command_sync(Command::Stop, timeout)
    }

    /// Queue a driver stop and return immediately.
    pub fn stop_async(&self) -> Result<()> {
        self.command_async(Command::Stop)
    }

    /// Connect with the stored credentials, blocking until an IP address
    /// is obtained or `timeout` elapses. A timeout fires an asynchronous
    /// `disconnect` to cancel the in-flight attempt.
    pub fn connect(&self, timeout: Duration) -> Result<()> {
        self.command_sync(Command::Connect, timeout)
    }

    /// Queue a connect and return immediately.
    pub fn connect_async(&self) -> Result<()> {
        self.command_async(Command::Connect)
    }

    /// Disconnect from the AP, blocking until the link is down or
    /// `timeout` elapses. Also the canonical way to interrupt an in-flight
    /// connect or an armed reconnect backoff.
    pub fn disconnect(&self, timeout: Duration) -> Result<()> {
        self.command_sync(Command::Disconnect, timeout)
    }

    /// Queue a disconnect and return immediately.
    pub fn disconnect_async(&self) -> Result<()> {
        self.command_async(Command::Disconnect)
    }

    fn command_sync(&self, cmd: Command, timeout: Duration) -> Result<()> {
        let channel = self.inner.channel().ok_or(Error::InvalidState)?;
        let state = self.get_state();
        match fsm::validate_command(state, cmd) {
            Action::Error => {
                warn!("{cmd:?} rejected in {state:?}");
                return Err(Error::InvalidState);
            }
            Action::Skip => {
                debug!("{cmd:?} is a no-op in {state:?}");
                return Ok(());
            }
            Action::Execute => {}
        }

        let success = success_bit(cmd);
        let failure = failure_bit(cmd);
        let mask = success | failure | bits::INVALID_STATE;

        // Clear before enqueue: the only way these bits set again is the
        // worker processing this command (or a driver event it causes).
        channel.bits.clear(mask);
        channel.queue.send(Message::Command(cmd));

        let observed = channel.bits.wait(mask, timeout);
        if observed & bits::INVALID_STATE != 0 {
            return Err(Error::InvalidState);
        }
        if observed & success != 0 {
            return Ok(());
        }
        if observed & failure != 0 {
            return Err(Error::Failed);
        }

        // Timed out. Cancel whatever the driver is still doing.
        match cmd {
            Command::Start => {
                warn!("start timed out, cancelling");
                let _ = self.stop_async();
            }
            Command::Connect => {
                warn!("connect timed out, cancelling attempt");
                let _ = self.disconnect_async();
            }
            _ => {}
        }
        Err(Error::Timeout)
    }

    fn command_async(&self, cmd: Command) -> Result<()> {
        let channel = self.inner.channel().ok_or(Error::InvalidState)?;
        let state = self.get_state();
        match fsm::validate_command(state, cmd) {
            Action::Error => {
                warn!("{cmd:?} rejected in {state:?}");
                Err(Error::InvalidState)
            }
            Action::Skip => {
                debug!("{cmd:?} is a no-op in {state:?}");
                Ok(())
            }
            Action::Execute => channel.queue.try_send(Message::Command(cmd)),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Snapshot of the current state.
    pub fn get_state(&self) -> State {
        self.inner.fsm_lock().state()
    }

    /// Recoverable-failure count of the current reconnection campaign.
    pub fn retry_count(&self) -> u32 {
        self.inner.fsm_lock().retry_count()
    }

    /// Suspect-failure strikes accumulated against the stored credentials.
    pub fn suspect_retry_count(&self) -> u32 {
        self.inner.fsm_lock().suspect_retry_count()
    }

    /// Whether the stored credentials are believed to work.
    pub fn is_credentials_valid(&self) -> bool {
        self.inner.creds.is_valid()
    }

    // ── Credentials ───────────────────────────────────────────

    /// Store a new credential pair (truncated to 32/64 bytes) and mark it
    /// valid. Tears down any in-flight association first, and releases a
    /// sticky `ErrorCredentials` state.
    pub fn set_credentials(&self, ssid: &str, password: &str) -> Result<()> {
        let mut fsm = self.inner.fsm_lock();
        if fsm.state() == State::Uninitialized {
            return Err(Error::InvalidState);
        }
        info!("applying new credentials");
        if fsm.is_active() {
            // Tear down any in-flight association before reconfiguring.
            let _ = self.inner.hal.disconnect();
        }
        self.inner.creds.save(ssid, password)?;
        fsm.reset_retries();
        if fsm.state() == State::ErrorCredentials {
            fsm.transition_to(State::DISCONNECTED);
        }
        Ok(())
    }

    /// Read the stored credential pair back from the driver.
    pub fn get_credentials(&self) -> Result<(heapless::String<32>, heapless::String<64>)> {
        self.inner.creds.load()
    }

    /// Blank the stored credentials and mark them invalid. Releases a
    /// sticky `ErrorCredentials` state.
    pub fn clear_credentials(&self) -> Result<()> {
        let mut fsm = self.inner.fsm_lock();
        if fsm.state() == State::Uninitialized {
            return Err(Error::InvalidState);
        }
        info!("clearing credentials");
        if fsm.is_active() {
            let _ = self.inner.hal.disconnect();
        }
        self.inner.creds.clear()?;
        fsm.reset_retries();
        if fsm.state() == State::ErrorCredentials {
            fsm.transition_to(State::DISCONNECTED);
        }
        Ok(())
    }

    /// Restore driver defaults and erase the manager's namespace.
    pub fn factory_reset(&self) -> Result<()> {
        let mut fsm = self.inner.fsm_lock();
        if fsm.state() == State::Uninitialized {
            return Err(Error::InvalidState);
        }
        info!("factory reset");
        self.inner.creds.factory_reset()?;
        fsm.reset_retries();
        fsm.transition_to(State::Initialized);
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Shared internals
// ───────────────────────────────────────────────────────────────

impl Inner {
    fn fsm_lock(&self) -> MutexGuard<'_, StateMachine> {
        self.fsm.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sync_lock(&self) -> MutexGuard<'_, Option<Arc<SyncChannel>>> {
        self.sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn channel(&self) -> Option<Arc<SyncChannel>> {
        self.sync_lock().clone()
    }

    fn process_message(
        &self,
        fsm: &mut StateMachine,
        channel: &SyncChannel,
        msg: Message,
    ) {
        match msg {
            Message::Command(cmd) => {
                // An explicit user action cancels the reconnection campaign.
                fsm.reset_retries();
                match fsm.validate_command(cmd) {
                    Action::Error => {
                        error!("{cmd:?} illegal in {:?}", fsm.state());
                        channel.bits.set(bits::INVALID_STATE);
                    }
                    Action::Skip => self.acknowledge_skip(fsm, channel, cmd),
                    Action::Execute => self.execute_command(fsm, channel, cmd),
                }
            }
            Message::Event { event, reason, rssi } => {
                self.handle_event(fsm, channel, event, reason, rssi)
            }
        }
    }

    /// A skipped command still wakes its blocking caller.
    fn acknowledge_skip(&self, fsm: &StateMachine, channel: &SyncChannel, cmd: Command) {
        let bit = match cmd {
            Command::Start => bits::STARTED,
            Command::Stop => bits::STOPPED,
            Command::Disconnect => bits::DISCONNECTED,
            // "Already connecting" is not "connected": only a full
            // association satisfies a blocking connect.
            Command::Connect if fsm.state() == State::ConnectedGotIp => bits::CONNECTED,
            Command::Connect | Command::Exit => return,
        };
        channel.bits.set(bit);
    }

    fn execute_command(
        &self,
        fsm: &mut StateMachine,
        channel: &SyncChannel,
        cmd: Command,
    ) {
        let prev = fsm.state();
        match cmd {
            Command::Start => {
                fsm.transition_to(State::Starting);
                if let Err(e) = self.hal.start() {
                    error!("driver start failed: {e}");
                    fsm.transition_to(prev);
                    channel.bits.set(bits::START_FAILED);
                }
            }
            Command::Stop => {
                fsm.transition_to(State::Stopping);
                if let Err(e) = self.hal.stop() {
                    error!("driver stop failed: {e}");
                    fsm.transition_to(prev);
                    channel.bits.set(bits::STOP_FAILED);
                }
            }
            Command::Connect => {
                fsm.transition_to(State::Connecting);
                if let Err(e) = self.hal.connect() {
                    error!("driver connect failed: {e}");
                    fsm.transition_to(prev);
                    channel.bits.set(bits::CONNECT_FAILED);
                }
            }
            Command::Disconnect => {
                // The driver never emits STA_DISCONNECTED for a link that
                // was never established; roll straight back to idle.
                if matches!(prev, State::WaitingReconnect | State::Connecting) {
                    fsm.transition_to(State::DISCONNECTED);
                    let _ = self.hal.disconnect();
                    channel.bits.set(bits::DISCONNECTED);
                    return;
                }
                fsm.transition_to(State::Disconnecting);
                if let Err(e) = self.hal.disconnect() {
                    error!("driver disconnect failed: {e}");
                    fsm.transition_to(prev);
                    channel.bits.set(bits::CONNECT_FAILED);
                }
            }
            Command::Exit => {}
        }
    }

    /// Apply the transition table, then the per-event side effects.
    fn handle_event(
        &self,
        fsm: &mut StateMachine,
        channel: &SyncChannel,
        event: Event,
        reason_code: u8,
        rssi: i8,
    ) {
        let prev = fsm.state();
        let outcome = fsm.resolve_event(event);
        fsm.transition_to(outcome.next);
        if outcome.bits != 0 {
            channel.bits.set(outcome.bits);
        }

        match event {
            Event::StaDisconnected => {
                self.on_sta_disconnected(fsm, channel, prev, reason_code, rssi)
            }
            Event::GotIp if matches!(prev, State::Connecting | State::ConnectedNoIp) => {
                info!("got IP address");
                fsm.reset_retries();
                if !self.creds.is_valid() {
                    // The stored credentials just proved themselves.
                    if let Err(e) = self.creds.save_valid_flag(true) {
                        warn!("failed to persist credential validity: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    /// Disconnect classification, first match wins.
    fn on_sta_disconnected(
        &self,
        fsm: &mut StateMachine,
        channel: &SyncChannel,
        prev: State,
        reason_code: u8,
        rssi: i8,
    ) {
        let tier = SignalTier::classify(rssi);
        info!("disconnected (reason {reason_code}, RSSI {rssi} dBm, {tier:?})");

        // 1. Intended: an API-driven disconnect or stop is in flight.
        if matches!(prev, State::Disconnecting | State::Stopping) {
            channel.bits.set(bits::DISCONNECTED | bits::CONNECT_FAILED);
            return;
        }

        // 1b. Driver refused to come up: the transition table already
        // reverted to INITIALIZED and fired START_FAILED.
        if prev == State::Starting {
            return;
        }

        // 2. Driver was not supposed to be running.
        if !prev.is_active() {
            warn!("disconnect ignored in state {prev:?}");
            channel.bits.set(bits::DISCONNECTED | bits::CONNECT_FAILED);
            return;
        }

        // 3. Benign leave. CONNECT_FAILED fires too so a blocked connect()
        // caller wakes instead of riding out its full timeout.
        if reason_code == reason::ASSOC_LEAVE {
            info!("left AP deliberately");
            fsm.transition_to(State::DISCONNECTED);
            channel.bits.set(bits::DISCONNECTED | bits::CONNECT_FAILED);
            return;
        }

        // 4. Suspect: wrong credentials or bad signal, tier decides.
        if reason::is_suspect(reason_code) {
            if fsm.handle_suspect_failure(rssi) {
                error!(
                    "credentials invalidated after {} suspect failure(s)",
                    fsm.suspect_retry_count()
                );
                if let Err(e) = self.creds.save_valid_flag(false) {
                    warn!("failed to persist credential invalidation: {e}");
                }
            } else {
                let strikes = fsm.suspect_retry_count();
                match tier.strike_limit() {
                    Some(limit) => warn!("suspect failure {strikes}/{limit} ({tier:?})"),
                    None => warn!("suspect failure {strikes} (critical signal, retrying)"),
                }
                let delay = fsm.calculate_next_backoff(time::now_ms());
                info!("reconnection attempt {} in {delay} ms", fsm.retry_count());
            }
            channel.bits.set(bits::CONNECT_FAILED);
            return;
        }

        // 5. Recoverable default.
        if self.creds.is_valid() {
            let delay = fsm.calculate_next_backoff(time::now_ms());
            info!("reconnection attempt {} in {delay} ms", fsm.retry_count());
        } else {
            warn!("credentials invalid, not reconnecting");
            fsm.transition_to(State::DISCONNECTED);
        }
        channel.bits.set(bits::CONNECT_FAILED);
    }

    /// The queue receive timed out: the backoff deadline arrived.
    fn on_backoff_expired(&self, fsm: &mut StateMachine) {
        if fsm.state() != State::WaitingReconnect {
            return;
        }
        if self.creds.is_valid() {
            info!("backoff expired, retrying connection");
            fsm.transition_to(State::Connecting);
            if let Err(e) = self.hal.connect() {
                error!("reconnect attempt failed to issue: {e}");
            }
        } else {
            warn!("credentials invalid, abandoning reconnect");
            fsm.transition_to(State::DISCONNECTED);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Worker
// ───────────────────────────────────────────────────────────────

fn worker_loop(inner: Arc<Inner>, channel: Arc<SyncChannel>) {
    info!("worker running");
    loop {
        // Sleep indefinitely unless a reconnect deadline bounds the wait.
        let wait = inner.fsm_lock().wait_duration(time::now_ms());
        let msg = match wait {
            None => Some(channel.queue.recv()),
            Some(d) => channel.queue.recv_timeout(d),
        };

        let mut fsm = inner.fsm_lock();
        match msg {
            Some(Message::Command(Command::Exit)) => {
                info!("worker exiting");
                break;
            }
            Some(msg) => inner.process_message(&mut fsm, &channel, msg),
            None => inner.on_backoff_expired(&mut fsm),
        }
    }
    inner.worker_exited.store(true, Ordering::Release);
}

/// Spawn the worker as a named thread. On ESP-IDF the pthread config makes
/// it a FreeRTOS task with an explicit stack size.
#[cfg(target_os = "espidf")]
fn spawn_worker(stack_kb: usize, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    unsafe {
        let mut cfg = esp_idf_svc::sys::esp_create_default_pthread_config();
        cfg.stack_size = (stack_kb * 1024) as i32;
        cfg.thread_name = b"wifi-mgr\0".as_ptr() as *const _;
        let ret = esp_idf_svc::sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            error!("esp_pthread_set_cfg failed ({ret})");
            return Err(Error::NoMem);
        }
    }
    thread::Builder::new()
        .name("wifi-mgr".into())
        .spawn(f)
        .map_err(|e| {
            error!("failed to spawn worker: {e}");
            Error::NoMem
        })
}

#[cfg(not(target_os = "espidf"))]
fn spawn_worker(stack_kb: usize, f: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("wifi-mgr".into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
        .map_err(|e| {
            error!("failed to spawn worker: {e}");
            Error::NoMem
        })
}
