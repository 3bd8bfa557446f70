//! Credential persistence.
//!
//! Credentials themselves live in the driver's own config storage (set and
//! read through the HAL); this module owns the one piece of state the
//! driver cannot answer: whether the stored credentials are believed to
//! work. The `valid` flag is persisted in a namespaced key-value store and
//! cached in an atomic so `is_valid()` never takes a lock — the worker
//! reads it on every disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::hal::{DriverHal, StaConfig};

/// The single key this component owns in its namespace.
const KEY_VALID: &str = "valid";

// ───────────────────────────────────────────────────────────────
// Storage port
// ───────────────────────────────────────────────────────────────

/// Namespaced key-value persistence. The namespace is fixed at
/// construction; keys are short ASCII names.
pub trait StoragePort: Send {
    /// Read a value into `buf`, returning the byte count.
    /// Absent keys report [`Error::NotFound`].
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<usize>;

    /// Write a value atomically.
    fn write(&mut self, key: &str, data: &[u8]) -> Result<()>;

    /// Erase every key in the namespace.
    fn erase_all(&mut self) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Credential store
// ───────────────────────────────────────────────────────────────

/// Combines the HAL (credential bytes) and a storage backend (validity
/// flag) behind the operations the manager needs.
pub struct CredentialStore {
    hal: Arc<dyn DriverHal>,
    storage: Mutex<Box<dyn StoragePort>>,
    valid: AtomicBool,
}

impl CredentialStore {
    pub fn new(hal: Arc<dyn DriverHal>, storage: Box<dyn StoragePort>) -> Self {
        Self {
            hal,
            storage: Mutex::new(storage),
            valid: AtomicBool::new(false),
        }
    }

    /// Load the persisted validity flag into the cache. An absent key
    /// means "not yet proven" and is not an error.
    pub fn load_valid_flag(&self) -> Result<()> {
        let mut buf = [0u8; 1];
        let storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        match storage.read(KEY_VALID, &mut buf) {
            Ok(n) => {
                self.valid.store(n == 1 && buf[0] != 0, Ordering::Relaxed);
                Ok(())
            }
            Err(Error::NotFound) => {
                self.valid.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the validity flag; the cache is updated only when the write
    /// lands.
    pub fn save_valid_flag(&self, valid: bool) -> Result<()> {
        let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        storage.write(KEY_VALID, &[u8::from(valid)])?;
        self.valid.store(valid, Ordering::Relaxed);
        Ok(())
    }

    /// Lock-free read of the cached validity flag.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    /// Write a credential pair into the driver config and mark it valid.
    /// Inputs are truncated to the 32/64-byte field limits.
    pub fn save(&self, ssid: &str, password: &str) -> Result<()> {
        let cfg = StaConfig::for_credentials(ssid, password);
        self.hal.set_config(&cfg)?;
        self.save_valid_flag(true)
    }

    /// Read the stored credential pair back from the driver.
    pub fn load(&self) -> Result<(heapless::String<32>, heapless::String<64>)> {
        let cfg = self.hal.get_config()?;
        Ok((cfg.ssid, cfg.password))
    }

    /// Blank the driver config and mark credentials invalid.
    pub fn clear(&self) -> Result<()> {
        let mut cfg = self.hal.get_config().unwrap_or_default();
        cfg.ssid.clear();
        cfg.password.clear();
        self.hal.set_config(&cfg)?;
        self.save_valid_flag(false)
    }

    /// Restore driver defaults and erase this component's namespace.
    pub fn factory_reset(&self) -> Result<()> {
        self.hal.restore()?;
        {
            let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = storage.erase_all() {
                warn!("failed to erase credential namespace: {e}");
            }
        }
        self.valid.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// If the driver has no SSID, install the compile-time default (when
    /// one is configured). A driver that already carries an SSID with no
    /// recorded flag is trusted and marked valid.
    pub fn ensure_config_fallback(&self, cfg: &ManagerConfig) -> Result<()> {
        let current = self.hal.get_config()?;
        if current.ssid.is_empty() {
            if !cfg.default_ssid.is_empty() {
                info!(
                    "no SSID in driver, installing default '{}'",
                    cfg.default_ssid
                );
                let fallback =
                    StaConfig::for_credentials(&cfg.default_ssid, &cfg.default_password);
                self.hal.set_config(&fallback)?;
                return self.save_valid_flag(true);
            }
        } else if !self.is_valid() {
            info!("driver already has SSID '{}'", current.ssid);
            return self.save_valid_flag(true);
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Backends
// ───────────────────────────────────────────────────────────────

/// In-memory backend for host builds and tests.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct MemStorage {
    entries: std::collections::HashMap<String, Vec<u8>>,
}

#[cfg(not(target_os = "espidf"))]
impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(target_os = "espidf"))]
impl StoragePort for MemStorage {
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        let value = self.entries.get(key).ok_or(Error::NotFound)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Ok(n)
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Shared-handle delegation so a test can keep inspecting the backend it
/// handed to the store.
#[cfg(not(target_os = "espidf"))]
impl StoragePort for Arc<Mutex<MemStorage>> {
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        self.lock().unwrap_or_else(|e| e.into_inner()).read(key, buf)
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.lock()
            .unwrap_or_else(|e| e.into_inner())
            .write(key, data)
    }

    fn erase_all(&mut self) -> Result<()> {
        self.lock().unwrap_or_else(|e| e.into_inner()).erase_all()
    }
}

/// NVS backend for the device.
#[cfg(target_os = "espidf")]
pub struct NvsStorage {
    nvs: esp_idf_svc::nvs::EspNvs<esp_idf_svc::nvs::NvsDefault>,
}

#[cfg(target_os = "espidf")]
impl NvsStorage {
    /// Open (or create) the namespace on the default NVS partition.
    pub fn new(namespace: &str) -> Result<Self> {
        use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
        let partition = EspNvsPartition::<NvsDefault>::take().map_err(|e| {
            warn!("NVS partition unavailable: {e}");
            Error::Failed
        })?;
        let nvs = EspNvs::new(partition, namespace, true).map_err(|e| {
            warn!("NVS namespace open failed: {e}");
            Error::Failed
        })?;
        Ok(Self { nvs })
    }
}

#[cfg(target_os = "espidf")]
impl StoragePort for NvsStorage {
    fn read(&self, key: &str, buf: &mut [u8]) -> Result<usize> {
        match self.nvs.get_raw(key, buf) {
            Ok(Some(data)) => Ok(data.len()),
            Ok(None) => Err(Error::NotFound),
            Err(_) => Err(Error::Failed),
        }
    }

    fn write(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.nvs.set_raw(key, data).map_err(|_| Error::Failed)?;
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        // The namespace holds exactly the keys this component writes.
        self.nvs.remove(KEY_VALID).map_err(|_| Error::Failed)?;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
