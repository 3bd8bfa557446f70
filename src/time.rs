//! Monotonic millisecond clock.
//!
//! Backoff deadlines are stored as absolute milliseconds on this clock,
//! mirroring the driver timer the reconnect logic was designed around.
//! `Instant` is monotonic on both host and ESP-IDF targets, so a single
//! implementation serves simulation and hardware.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the first call in this process.
pub fn now_ms() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}
