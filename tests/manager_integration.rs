//! End-to-end manager scenarios against the scripted driver.
//!
//! Every test builds a fresh manager over a [`MockDriver`] and an
//! in-memory credential store, drives it through the public API, and
//! injects driver events through the same queue path the real callbacks
//! use.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wifimgr::hal::mock::{Behavior, MockDriver};
use wifimgr::message::{reason, Event};
use wifimgr::store::MemStorage;
use wifimgr::sync::QUEUE_DEPTH;
use wifimgr::{Error, ManagerConfig, State, WifiManager};

// ── Helpers ───────────────────────────────────────────────────

fn make_manager() -> (WifiManager, Arc<MockDriver>) {
    make_manager_with(Behavior::default())
}

fn make_manager_with(behavior: Behavior) -> (WifiManager, Arc<MockDriver>) {
    let hal = Arc::new(MockDriver::with_behavior(behavior));
    let mgr = WifiManager::new(
        hal.clone(),
        Box::new(MemStorage::new()),
        ManagerConfig::default(),
    );
    (mgr, hal)
}

/// Poll until the manager reaches `state` or `deadline` elapses.
fn wait_for_state(mgr: &WifiManager, state: State, deadline: Duration) -> bool {
    let t0 = Instant::now();
    loop {
        if mgr.get_state() == state {
            return true;
        }
        if t0.elapsed() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

const SHORT: Duration = Duration::from_millis(100);
const OP: Duration = Duration::from_secs(5);

// ── T1: full happy path ───────────────────────────────────────

#[test]
fn full_happy_path() {
    let (mgr, _hal) = make_manager();

    mgr.init().unwrap();
    assert_eq!(mgr.get_state(), State::Initialized);

    mgr.start(OP).unwrap();
    assert_eq!(mgr.get_state(), State::Started);

    mgr.set_credentials("S", "P").unwrap();
    mgr.connect(OP).unwrap();

    assert_eq!(mgr.get_state(), State::ConnectedGotIp);
    assert!(mgr.is_credentials_valid());
}

// ── P2: idempotent lifecycle ──────────────────────────────────

#[test]
fn repeated_lifecycle_commands_are_idempotent() {
    let (mgr, _hal) = make_manager();

    mgr.init().unwrap();
    mgr.init().unwrap();
    assert_eq!(mgr.get_state(), State::Initialized);

    mgr.start(OP).unwrap();
    mgr.start(SHORT).unwrap(); // SKIP: already started
    assert_eq!(mgr.get_state(), State::Started);

    mgr.disconnect(SHORT).unwrap(); // SKIP: nothing to tear down
    assert_eq!(mgr.get_state(), State::Started);

    mgr.set_credentials("Net", "password1").unwrap();
    mgr.connect(OP).unwrap();
    mgr.connect(SHORT).unwrap(); // SKIP: already connected
    assert_eq!(mgr.get_state(), State::ConnectedGotIp);

    mgr.stop(OP).unwrap();
    mgr.stop(SHORT).unwrap(); // SKIP: already stopped
    assert_eq!(mgr.get_state(), State::STOPPED);

    mgr.deinit().unwrap();
    mgr.deinit().unwrap();
    assert_eq!(mgr.get_state(), State::Uninitialized);
}

// ── T2: immediate invalidation at GOOD RSSI ───────────────────

#[test]
fn suspect_failure_at_good_rssi_invalidates_immediately() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("X", "bad-password").unwrap();
    assert!(mgr.is_credentials_valid());

    hal.events()
        .push(Event::StaDisconnected, reason::FOUR_WAY_HANDSHAKE_TIMEOUT, -50);

    assert!(wait_for_state(&mgr, State::ErrorCredentials, OP));
    assert!(!mgr.is_credentials_valid());
}

// ── T3 (tiered): strike counts follow the RSSI band ───────────

#[test]
fn suspect_failures_at_medium_rssi_invalidate_on_second_strike() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Sus", "pw-suspect").unwrap();

    hal.events()
        .push(Event::StaDisconnected, reason::CONNECTION_FAIL, -60);
    assert!(wait_for_state(&mgr, State::WaitingReconnect, OP));
    assert!(mgr.is_credentials_valid());

    hal.events()
        .push(Event::StaDisconnected, reason::CONNECTION_FAIL, -60);
    assert!(wait_for_state(&mgr, State::ErrorCredentials, OP));
    assert!(!mgr.is_credentials_valid());
}

#[test]
fn suspect_failures_at_weak_rssi_invalidate_on_fifth_strike() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Sus", "pw-suspect").unwrap();

    for strike in 1..=4 {
        hal.events()
            .push(Event::StaDisconnected, reason::CONNECTION_FAIL, -70);
        thread::sleep(Duration::from_millis(30));
        assert_ne!(
            mgr.get_state(),
            State::ErrorCredentials,
            "strike {strike} must not invalidate yet"
        );
        assert!(mgr.is_credentials_valid());
    }

    hal.events()
        .push(Event::StaDisconnected, reason::CONNECTION_FAIL, -70);
    assert!(wait_for_state(&mgr, State::ErrorCredentials, OP));
    assert!(!mgr.is_credentials_valid());
}

#[test]
fn suspect_failures_at_critical_rssi_never_invalidate() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Edge", "pw-basement").unwrap();

    for _ in 0..8 {
        hal.events()
            .push(Event::StaDisconnected, reason::CONNECTION_FAIL, -90);
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(50));

    assert_ne!(mgr.get_state(), State::ErrorCredentials);
    assert!(mgr.is_credentials_valid());
}

// ── T4: backoff interrupted by disconnect ─────────────────────

#[test]
fn disconnect_interrupts_backoff_immediately() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("NoAP", "pw-missing").unwrap();

    hal.events()
        .push(Event::StaDisconnected, reason::NO_AP_FOUND, -60);
    assert!(wait_for_state(&mgr, State::WaitingReconnect, OP));

    mgr.disconnect_async().unwrap();
    // Well inside the 1 s backoff deadline.
    assert!(wait_for_state(
        &mgr,
        State::DISCONNECTED,
        Duration::from_millis(100)
    ));
}

// ── T5: command matrix through the API ────────────────────────

#[test]
fn command_matrix_subset_from_initialized() {
    let (mgr, _hal) = make_manager();
    mgr.init().unwrap();

    assert_eq!(mgr.connect(SHORT), Err(Error::InvalidState));
    assert_eq!(mgr.disconnect(SHORT), Err(Error::InvalidState));
    assert_eq!(mgr.stop(SHORT), Ok(())); // SKIP: already stopped
    assert_eq!(mgr.get_state(), State::Initialized);
}

#[test]
fn command_matrix_subset_from_started() {
    let (mgr, _hal) = make_manager();
    mgr.init().unwrap();
    mgr.start(OP).unwrap();

    assert_eq!(mgr.start(SHORT), Ok(())); // SKIP
    assert_eq!(mgr.disconnect(SHORT), Ok(())); // SKIP
    assert_eq!(mgr.get_state(), State::Started);
}

#[test]
fn command_matrix_subset_from_connecting() {
    let (mgr, _hal) = make_manager_with(Behavior::no_network());
    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Net", "password1").unwrap();

    mgr.connect_async().unwrap();
    assert!(wait_for_state(&mgr, State::Connecting, OP));

    assert_eq!(mgr.start(SHORT), Ok(())); // SKIP
    assert_eq!(mgr.connect(SHORT), Ok(())); // SKIP
    assert_eq!(mgr.get_state(), State::Connecting);
}

// ── T6: queue overflow ────────────────────────────────────────

#[test]
fn event_queue_refuses_overflow_and_drains() {
    // Block the worker inside the driver connect call so pushed events
    // pile up in the queue instead of being drained.
    let (mgr, hal) = make_manager_with(Behavior {
        auto_connect: false,
        connect_block_ms: 400,
        ..Behavior::default()
    });

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Busy", "password1").unwrap();

    mgr.connect_async().unwrap();
    // Let the worker pick the command up and enter the blocking call.
    thread::sleep(Duration::from_millis(100));

    let events = hal.events();
    let mut accepted = 0;
    for _ in 0..2 * QUEUE_DEPTH {
        if events.push_event(Event::LostIp) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, QUEUE_DEPTH, "exactly the queue depth fits");

    // Once the worker resumes, the backlog drains quickly.
    let t0 = Instant::now();
    while events.pending() > 0 && t0.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(events.pending(), 0, "queue must drain after the worker resumes");
}

// ── T7: credential persistence across deinit/init ─────────────

#[test]
fn credentials_persist_across_deinit_init() {
    let (mgr, _hal) = make_manager();
    let ssid = "S".repeat(32);
    let password = "P".repeat(64);

    mgr.init().unwrap();
    mgr.set_credentials(&ssid, &password).unwrap();
    mgr.deinit().unwrap();

    mgr.init().unwrap();
    assert!(mgr.is_credentials_valid());
    let (got_ssid, got_password) = mgr.get_credentials().unwrap();
    assert_eq!(got_ssid.as_str(), ssid);
    assert_eq!(got_password.as_str(), password);
}

// ── P6: explicit commands reset the retry campaign ────────────

#[test]
fn user_command_resets_retry_counters() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Flaky", "password1").unwrap();

    hal.events()
        .push(Event::StaDisconnected, reason::NO_AP_FOUND, -60);
    assert!(wait_for_state(&mgr, State::WaitingReconnect, OP));
    hal.events()
        .push(Event::StaDisconnected, reason::NO_AP_FOUND, -60);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mgr.retry_count(), 2);

    // An explicit disconnect cancels the campaign.
    mgr.disconnect(OP).unwrap();
    assert_eq!(mgr.retry_count(), 0);
    assert_eq!(mgr.suspect_retry_count(), 0);
    assert_eq!(mgr.get_state(), State::DISCONNECTED);
}

// ── P7: rollback on timeout ───────────────────────────────────

#[test]
fn start_timeout_rolls_back_to_stopped() {
    // Driver accepts start but never reports STA_START; stop still works.
    let (mgr, _hal) = make_manager_with(Behavior {
        auto_start: false,
        ..Behavior::default()
    });

    mgr.init().unwrap();
    assert_eq!(mgr.start(Duration::from_millis(150)), Err(Error::Timeout));

    // The rollback stop() converges on STOPPED.
    assert!(wait_for_state(&mgr, State::STOPPED, OP));
}

#[test]
fn connect_timeout_rolls_back_to_disconnected() {
    let (mgr, _hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Slow", "password1").unwrap();

    assert_eq!(mgr.connect(Duration::from_millis(150)), Err(Error::Timeout));
    assert!(wait_for_state(&mgr, State::DISCONNECTED, OP));
}

// ── Event-path behaviors ──────────────────────────────────────

#[test]
fn benign_leave_goes_idle_without_backoff() {
    let (mgr, hal) = make_manager();

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Net", "password1").unwrap();
    mgr.connect(OP).unwrap();

    hal.events()
        .push(Event::StaDisconnected, reason::ASSOC_LEAVE, -40);

    assert!(wait_for_state(&mgr, State::DISCONNECTED, OP));
    assert_eq!(mgr.retry_count(), 0, "benign leave must not arm a backoff");
}

#[test]
fn lost_ip_degrades_then_got_ip_restores() {
    let (mgr, hal) = make_manager();

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Net", "password1").unwrap();
    mgr.connect(OP).unwrap();

    hal.events().push_event(Event::LostIp);
    assert!(wait_for_state(&mgr, State::ConnectedNoIp, OP));

    hal.events().push_event(Event::GotIp);
    assert!(wait_for_state(&mgr, State::ConnectedGotIp, OP));
}

#[test]
fn early_got_ip_completes_the_connect() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Net", "password1").unwrap();

    mgr.connect_async().unwrap();
    assert!(wait_for_state(&mgr, State::Connecting, OP));

    // IP arrives before the association event is drained.
    hal.events().push_event(Event::GotIp);
    assert!(wait_for_state(&mgr, State::ConnectedGotIp, OP));
}

#[test]
fn got_ip_rehabilitates_the_valid_flag() {
    let (mgr, _hal) = make_manager();

    mgr.init().unwrap();
    assert!(!mgr.is_credentials_valid());

    mgr.start(OP).unwrap();
    mgr.connect(OP).unwrap();

    // A successful association proves whatever the driver had stored. The
    // flag write happens just after the connect waiter wakes, so poll.
    let t0 = Instant::now();
    while !mgr.is_credentials_valid() && t0.elapsed() < OP {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(mgr.is_credentials_valid());
}

#[test]
fn backoff_expiry_triggers_reconnect() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Net", "password1").unwrap();

    let connects_before = hal.call_count("connect");
    hal.events()
        .push(Event::StaDisconnected, reason::NO_AP_FOUND, -60);
    assert!(wait_for_state(&mgr, State::WaitingReconnect, OP));

    // First backoff is 1 s; the worker then re-issues the connect.
    assert!(wait_for_state(&mgr, State::Connecting, Duration::from_secs(3)));
    assert!(hal.call_count("connect") > connects_before);
}

// ── Sticky ERROR_CREDENTIALS release ──────────────────────────

fn drive_to_error_credentials(mgr: &WifiManager, hal: &MockDriver) {
    mgr.start(OP).unwrap();
    mgr.set_credentials("Wrong", "pw-wrong").unwrap();
    hal.events()
        .push(Event::StaDisconnected, reason::AUTH_FAIL, -45);
    assert!(wait_for_state(mgr, State::ErrorCredentials, OP));
    assert!(!mgr.is_credentials_valid());
}

#[test]
fn set_credentials_releases_error_credentials() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());
    mgr.init().unwrap();
    drive_to_error_credentials(&mgr, &hal);

    mgr.set_credentials("Right", "pw-right").unwrap();
    assert_eq!(mgr.get_state(), State::DISCONNECTED);
    assert!(mgr.is_credentials_valid());
    assert_eq!(mgr.suspect_retry_count(), 0);

    // A fresh connect attempt is legal again.
    mgr.connect_async().unwrap();
    assert!(wait_for_state(&mgr, State::Connecting, OP));
}

#[test]
fn clear_credentials_releases_error_credentials() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());
    mgr.init().unwrap();
    drive_to_error_credentials(&mgr, &hal);

    mgr.clear_credentials().unwrap();
    assert_eq!(mgr.get_state(), State::DISCONNECTED);
    assert!(!mgr.is_credentials_valid());
    let (ssid, password) = mgr.get_credentials().unwrap();
    assert!(ssid.is_empty());
    assert!(password.is_empty());
}

#[test]
fn factory_reset_releases_error_credentials() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());
    mgr.init().unwrap();
    drive_to_error_credentials(&mgr, &hal);

    mgr.factory_reset().unwrap();
    assert_eq!(mgr.get_state(), State::Initialized);
    assert!(!mgr.is_credentials_valid());
    assert_eq!(mgr.retry_count(), 0);
    assert_eq!(hal.call_count("restore"), 1);
}

// ── Lifecycle edges ───────────────────────────────────────────

#[test]
fn api_rejects_everything_before_init() {
    let (mgr, _hal) = make_manager();

    assert_eq!(mgr.start(SHORT), Err(Error::InvalidState));
    assert_eq!(mgr.start_async(), Err(Error::InvalidState));
    assert_eq!(mgr.connect(SHORT), Err(Error::InvalidState));
    assert_eq!(mgr.set_credentials("Net", "pw"), Err(Error::InvalidState));
    assert_eq!(mgr.clear_credentials(), Err(Error::InvalidState));
    assert_eq!(mgr.factory_reset(), Err(Error::InvalidState));
    assert_eq!(mgr.get_state(), State::Uninitialized);
}

#[test]
fn async_commands_complete_eventually() {
    let (mgr, _hal) = make_manager();

    mgr.init().unwrap();
    mgr.start_async().unwrap();
    assert!(wait_for_state(&mgr, State::Started, OP));

    mgr.set_credentials("Net", "password1").unwrap();
    mgr.connect_async().unwrap();
    assert!(wait_for_state(&mgr, State::ConnectedGotIp, OP));

    mgr.stop_async().unwrap();
    assert!(wait_for_state(&mgr, State::STOPPED, OP));
}

#[test]
fn deinit_during_backoff_exits_promptly() {
    let (mgr, hal) = make_manager_with(Behavior::no_network());

    mgr.init().unwrap();
    mgr.start(OP).unwrap();
    mgr.set_credentials("Net", "password1").unwrap();

    // Pile up retries so the armed backoff is multiple seconds long.
    for _ in 0..5 {
        hal.events()
            .push(Event::StaDisconnected, reason::NO_AP_FOUND, -60);
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(mgr.get_state(), State::WaitingReconnect);

    // Shutdown must not ride out the reconnect deadline.
    let t0 = Instant::now();
    mgr.deinit().unwrap();
    assert!(
        t0.elapsed() < Duration::from_millis(1500),
        "deinit took {:?}",
        t0.elapsed()
    );
    assert_eq!(mgr.get_state(), State::Uninitialized);
}

#[test]
fn failed_driver_start_reports_failure_and_reverts() {
    let (mgr, _hal) = make_manager_with(Behavior {
        fail_start: true,
        ..Behavior::default()
    });

    mgr.init().unwrap();
    assert_eq!(mgr.start(OP), Err(Error::Failed));
    assert_eq!(mgr.get_state(), State::Initialized);
}

#[test]
fn driver_refusing_to_start_reports_start_failed() {
    // Driver accepts the call but immediately reports STA_DISCONNECTED,
    // the "refused to come up" pattern.
    let (mgr, hal) = make_manager_with(Behavior {
        auto_start: false,
        ..Behavior::default()
    });

    mgr.init().unwrap();
    let handle = {
        let mgr = mgr.clone();
        thread::spawn(move || mgr.start(OP))
    };
    // Wait until the worker has entered STARTING, then refuse.
    assert!(wait_for_state(&mgr, State::Starting, OP));
    hal.events().push(Event::StaDisconnected, 0, 0);

    assert_eq!(handle.join().unwrap(), Err(Error::Failed));
    assert_eq!(mgr.get_state(), State::Initialized);
}
