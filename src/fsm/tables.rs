//! The static decision tables.
//!
//! Three fixed-size arrays indexed by state discriminant — no heap, no
//! `dyn`, no nested `switch`. The command matrix says whether a command is
//! executed, skipped, or rejected; the transition matrix says where each
//! driver event takes each state and which outcome bits fire; the props
//! table carries the derived per-state booleans.
//!
//! Only the interesting transitions are spelled out; every other cell is a
//! self-loop with no bits.

use super::{Action, EventOutcome, State, StateProps};
use crate::message::{Command, Event};
use crate::sync::bits;

const fn props(is_active: bool, is_connected: bool, is_sta_ready: bool) -> StateProps {
    StateProps {
        is_active,
        is_connected,
        is_sta_ready,
    }
}

pub static STATE_PROPS: [StateProps; State::COUNT] = [
    /* UNINITIALIZED     */ props(false, false, false),
    /* INITIALIZING      */ props(false, false, false),
    /* INITIALIZED       */ props(false, false, false),
    /* STARTING          */ props(true, false, false),
    /* STARTED           */ props(true, false, true),
    /* CONNECTING        */ props(true, false, true),
    /* CONNECTED_NO_IP   */ props(true, true, true),
    /* CONNECTED_GOT_IP  */ props(true, true, true),
    /* DISCONNECTING     */ props(true, false, true),
    /* WAITING_RECONNECT */ props(true, false, true),
    /* ERROR_CREDENTIALS */ props(true, false, true),
    /* STOPPING          */ props(true, false, false),
];

const EXEC: Action = Action::Execute;
const SKIP: Action = Action::Skip;
const ERR: Action = Action::Error;

/// Command legality, `[state][command]`. The EXIT column is all-reject:
/// EXIT is posted internally by `deinit` and intercepted by the worker
/// before dispatch, so it never passes through validation.
pub static COMMAND_MATRIX: [[Action; Command::COUNT]; State::COUNT] = [
    // START, STOP,  CONNECT, DISCONNECT, EXIT
    [ERR, ERR, ERR, ERR, ERR],      // UNINITIALIZED
    [ERR, ERR, ERR, ERR, ERR],      // INITIALIZING
    [EXEC, SKIP, ERR, ERR, ERR],    // INITIALIZED
    [SKIP, EXEC, ERR, ERR, ERR],    // STARTING
    [SKIP, EXEC, EXEC, SKIP, ERR],  // STARTED
    [SKIP, EXEC, SKIP, EXEC, ERR],  // CONNECTING
    [SKIP, EXEC, SKIP, EXEC, ERR],  // CONNECTED_NO_IP
    [SKIP, EXEC, SKIP, EXEC, ERR],  // CONNECTED_GOT_IP
    [SKIP, EXEC, ERR, SKIP, ERR],   // DISCONNECTING
    [SKIP, EXEC, EXEC, EXEC, ERR],  // WAITING_RECONNECT
    [SKIP, EXEC, EXEC, EXEC, ERR],  // ERROR_CREDENTIALS
    [ERR, SKIP, ERR, ERR, ERR],     // STOPPING
];

const fn stay(state: State) -> EventOutcome {
    EventOutcome {
        next: state,
        bits: 0,
    }
}

const fn go(next: State, bits: u32) -> EventOutcome {
    EventOutcome { next, bits }
}

const fn quiet_row(state: State) -> [EventOutcome; Event::COUNT] {
    [stay(state); Event::COUNT]
}

/// Event transitions, `[state][event]`. Event column order:
/// STA_START, STA_STOP, STA_CONNECTED, STA_DISCONNECTED, GOT_IP, LOST_IP.
pub static TRANSITION_MATRIX: [[EventOutcome; Event::COUNT]; State::COUNT] = [
    /* UNINITIALIZED     */ quiet_row(State::Uninitialized),
    /* INITIALIZING      */ quiet_row(State::Initializing),
    /* INITIALIZED       */ quiet_row(State::Initialized),
    /* STARTING          */
    [
        go(State::Started, bits::STARTED),
        stay(State::Starting),
        stay(State::Starting),
        // Driver refused to come up.
        go(State::Initialized, bits::START_FAILED),
        stay(State::Starting),
        stay(State::Starting),
    ],
    /* STARTED           */ quiet_row(State::Started),
    /* CONNECTING        */
    [
        stay(State::Connecting),
        stay(State::Connecting),
        go(State::ConnectedNoIp, 0),
        go(State::WaitingReconnect, 0),
        // Rare early-IP path: the stack can deliver GOT_IP before the
        // association event is drained.
        go(State::ConnectedGotIp, bits::CONNECTED),
        stay(State::Connecting),
    ],
    /* CONNECTED_NO_IP   */
    [
        stay(State::ConnectedNoIp),
        stay(State::ConnectedNoIp),
        stay(State::ConnectedNoIp),
        go(State::WaitingReconnect, 0),
        go(State::ConnectedGotIp, bits::CONNECTED),
        stay(State::ConnectedNoIp),
    ],
    /* CONNECTED_GOT_IP  */
    [
        stay(State::ConnectedGotIp),
        stay(State::ConnectedGotIp),
        stay(State::ConnectedGotIp),
        go(State::WaitingReconnect, 0),
        stay(State::ConnectedGotIp),
        go(State::ConnectedNoIp, 0),
    ],
    /* DISCONNECTING     */
    [
        stay(State::Disconnecting),
        stay(State::Disconnecting),
        stay(State::Disconnecting),
        go(State::DISCONNECTED, bits::DISCONNECTED),
        stay(State::Disconnecting),
        stay(State::Disconnecting),
    ],
    /* WAITING_RECONNECT */ quiet_row(State::WaitingReconnect),
    /* ERROR_CREDENTIALS */ quiet_row(State::ErrorCredentials),
    /* STOPPING          */
    [
        stay(State::Stopping),
        go(State::Initialized, bits::STOPPED),
        stay(State::Stopping),
        stay(State::Stopping),
        stay(State::Stopping),
        stay(State::Stopping),
    ],
];
