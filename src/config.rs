//! Manager configuration.
//!
//! Compile-time credential defaults (the Kconfig analog) plus the runtime
//! knobs a host application may want to override. Everything has a sensible
//! default; `WifiManager::new` takes a `ManagerConfig` by value.

use serde::{Deserialize, Serialize};

/// Compile-time default SSID, consulted by the config fallback when the
/// driver has no stored network. Set via the `WIFI_MGR_DEFAULT_SSID`
/// environment variable at build time; empty means "no default".
pub const DEFAULT_SSID: &str = match option_env!("WIFI_MGR_DEFAULT_SSID") {
    Some(v) => v,
    None => "",
};

/// Compile-time default password, paired with [`DEFAULT_SSID`].
pub const DEFAULT_PASSWORD: &str = match option_env!("WIFI_MGR_DEFAULT_PASSWORD") {
    Some(v) => v,
    None => "",
};

/// Runtime configuration for the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    // --- Persistence ---
    /// NVS namespace for the manager's own keys (the `valid` flag).
    pub nvs_namespace: String,

    // --- Fallback credentials ---
    /// Default SSID installed when the driver has none (empty = disabled).
    pub default_ssid: String,
    /// Password paired with `default_ssid`.
    pub default_password: String,

    // --- Worker ---
    /// Worker thread stack size in KiB.
    pub worker_stack_kb: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            nvs_namespace: "wifi_manager".to_string(),
            default_ssid: DEFAULT_SSID.to_string(),
            default_password: DEFAULT_PASSWORD.to_string(),
            worker_stack_kb: 6,
        }
    }
}
