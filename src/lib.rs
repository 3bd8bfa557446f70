//! WiFi station connection manager.
//!
//! A serialized, message-driven controller between an application and the
//! platform WiFi driver: a small synchronous + asynchronous API backed by
//! a strict table-driven state machine, a unified command/event queue, a
//! single worker thread that owns all state mutation, exponential
//! reconnection backoff, and RSSI-tiered credential invalidation.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`;
//! every other target gets a scripted simulation driver and an in-memory
//! credential store, so the full manager runs under host tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wifimgr::{ManagerConfig, WifiManager};
//!
//! # #[cfg(not(target_os = "espidf"))]
//! # fn demo() -> wifimgr::Result<()> {
//! let hal = Arc::new(wifimgr::hal::mock::MockDriver::new());
//! let storage = Box::new(wifimgr::store::MemStorage::new());
//! let mgr = WifiManager::new(hal, storage, ManagerConfig::default());
//!
//! mgr.init()?;
//! mgr.set_credentials("HomeNet", "hunter22")?;
//! mgr.start(Duration::from_secs(5))?;
//! mgr.connect(Duration::from_secs(15))?;
//! # Ok(())
//! # }
//! ```

#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod fsm;
pub mod hal;
pub mod manager;
pub mod message;
pub mod store;
pub mod sync;

mod time;

pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use fsm::State;
pub use manager::WifiManager;
