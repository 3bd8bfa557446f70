//! ESP-IDF driver implementation.
//!
//! Thin wrappers over the raw `esp_idf_svc::sys` driver calls, plus the two
//! `extern "C"` event trampolines that translate raw WiFi/IP events into
//! queue messages. The trampolines receive the [`EventSender`] as their
//! opaque argument — they never see the manager itself.

use std::ffi::c_void;
use std::sync::Mutex;

use esp_idf_svc::sys::*;
use log::{error, warn};

use super::{AuthThreshold, DriverHal, EventSender, ScanMethod, StaConfig};
use crate::error::{Error, Result};
use crate::message::Event;

/// Map a driver return code, treating "already done" answers on bring-up
/// paths as success when `allow_invalid_state` is set.
fn check(code: esp_err_t, allow_invalid_state: bool) -> Result<()> {
    if code == ESP_OK as esp_err_t {
        return Ok(());
    }
    if allow_invalid_state && code == ESP_ERR_INVALID_STATE as esp_err_t {
        warn!("driver reports already-initialized ({code}), continuing");
        return Ok(());
    }
    if code == ESP_ERR_NO_MEM as esp_err_t {
        Err(Error::NoMem)
    } else if code == ESP_ERR_INVALID_STATE as esp_err_t {
        Err(Error::InvalidState)
    } else if code == ESP_ERR_TIMEOUT as esp_err_t {
        Err(Error::Timeout)
    } else {
        Err(Error::Failed)
    }
}

struct Inner {
    sta_netif: *mut esp_netif_obj,
    wifi_instance: esp_event_handler_instance_t,
    ip_instance: esp_event_handler_instance_t,
    /// Leaked sender handed to the trampolines; reclaimed on unregister.
    sender: *mut EventSender,
    wifi_init_done: bool,
}

// The raw handles are only touched under the mutex, and the driver calls
// themselves are thread-safe at the ESP-IDF layer.
unsafe impl Send for Inner {}

/// Real driver backend.
pub struct EspDriverHal {
    inner: Mutex<Inner>,
}

impl EspDriverHal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sta_netif: core::ptr::null_mut(),
                wifi_instance: core::ptr::null_mut(),
                ip_instance: core::ptr::null_mut(),
                sender: core::ptr::null_mut(),
                wifi_init_done: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EspDriverHal {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverHal for EspDriverHal {
    fn init_netif(&self) -> Result<()> {
        check(unsafe { esp_netif_init() }, true)
    }

    fn create_default_event_loop(&self) -> Result<()> {
        check(unsafe { esp_event_loop_create_default() }, true)
    }

    fn setup_sta_netif(&self) -> Result<()> {
        let mut inner = self.lock();
        unsafe {
            // Reuse an existing default STA interface if another component
            // already created one.
            let existing =
                esp_netif_get_handle_from_ifkey(b"WIFI_STA_DEF\0".as_ptr() as *const _);
            inner.sta_netif = if existing.is_null() {
                esp_netif_create_default_wifi_sta()
            } else {
                warn!("using existing default STA netif");
                existing
            };
        }
        if inner.sta_netif.is_null() {
            error!("failed to create default STA netif");
            return Err(Error::Failed);
        }
        Ok(())
    }

    fn init_wifi(&self) -> Result<()> {
        let cfg = wifi_init_config_t {
            ..Default::default()
        };
        let code = unsafe { esp_wifi_init(&cfg) };
        if code == ESP_OK as esp_err_t {
            self.lock().wifi_init_done = true;
        }
        check(code, true)
    }

    fn set_mode_sta(&self) -> Result<()> {
        check(unsafe { esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA) }, false)
    }

    fn deinit(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.wifi_init_done {
            let code = unsafe { esp_wifi_deinit() };
            if code == ESP_OK as esp_err_t || code == ESP_ERR_WIFI_NOT_INIT as esp_err_t {
                inner.wifi_init_done = false;
            } else {
                warn!("esp_wifi_deinit failed ({code})");
            }
        }
        if !inner.sta_netif.is_null() {
            unsafe { esp_netif_destroy_default_wifi(inner.sta_netif as *mut c_void) };
            inner.sta_netif = core::ptr::null_mut();
        }
        Ok(())
    }

    fn register_event_handlers(&self, events: EventSender) -> Result<()> {
        let mut inner = self.lock();
        let arg = Box::into_raw(Box::new(events));
        let code = unsafe {
            esp_event_handler_instance_register(
                WIFI_EVENT,
                ESP_EVENT_ANY_ID,
                Some(wifi_event_trampoline),
                arg as *mut c_void,
                &mut inner.wifi_instance,
            )
        };
        if code != ESP_OK as esp_err_t {
            drop(unsafe { Box::from_raw(arg) });
            return check(code, false);
        }
        let code = unsafe {
            esp_event_handler_instance_register(
                IP_EVENT,
                ESP_EVENT_ANY_ID,
                Some(ip_event_trampoline),
                arg as *mut c_void,
                &mut inner.ip_instance,
            )
        };
        if code != ESP_OK as esp_err_t {
            unsafe {
                esp_event_handler_instance_unregister(
                    WIFI_EVENT,
                    ESP_EVENT_ANY_ID,
                    inner.wifi_instance,
                );
            }
            inner.wifi_instance = core::ptr::null_mut();
            drop(unsafe { Box::from_raw(arg) });
            return check(code, false);
        }
        inner.sender = arg;
        Ok(())
    }

    fn unregister_event_handlers(&self) -> Result<()> {
        let mut inner = self.lock();
        unsafe {
            if !inner.wifi_instance.is_null() {
                esp_event_handler_instance_unregister(
                    WIFI_EVENT,
                    ESP_EVENT_ANY_ID,
                    inner.wifi_instance,
                );
                inner.wifi_instance = core::ptr::null_mut();
            }
            if !inner.ip_instance.is_null() {
                esp_event_handler_instance_unregister(
                    IP_EVENT,
                    ESP_EVENT_ANY_ID,
                    inner.ip_instance,
                );
                inner.ip_instance = core::ptr::null_mut();
            }
            if !inner.sender.is_null() {
                drop(Box::from_raw(inner.sender));
                inner.sender = core::ptr::null_mut();
            }
        }
        Ok(())
    }

    fn start(&self) -> Result<()> {
        check(unsafe { esp_wifi_start() }, false)
    }

    fn stop(&self) -> Result<()> {
        check(unsafe { esp_wifi_stop() }, false)
    }

    fn connect(&self) -> Result<()> {
        check(unsafe { esp_wifi_connect() }, false)
    }

    fn disconnect(&self) -> Result<()> {
        check(unsafe { esp_wifi_disconnect() }, false)
    }

    fn restore(&self) -> Result<()> {
        check(unsafe { esp_wifi_restore() }, false)
    }

    fn set_config(&self, cfg: &StaConfig) -> Result<()> {
        unsafe {
            let mut raw: wifi_config_t = core::mem::zeroed();
            let sta = &mut raw.__bindgen_anon_1.sta;

            let ssid = cfg.ssid.as_bytes();
            sta.ssid[..ssid.len()].copy_from_slice(ssid);
            let password = cfg.password.as_bytes();
            sta.password[..password.len()].copy_from_slice(password);

            sta.scan_method = match cfg.scan_method {
                ScanMethod::Fast => wifi_scan_method_t_WIFI_FAST_SCAN,
                ScanMethod::AllChannel => wifi_scan_method_t_WIFI_ALL_CHANNEL_SCAN,
            };
            sta.threshold.authmode = match cfg.auth_threshold {
                AuthThreshold::Open => wifi_auth_mode_t_WIFI_AUTH_OPEN,
                AuthThreshold::Wpa2Psk => wifi_auth_mode_t_WIFI_AUTH_WPA2_PSK,
            };
            sta.pmf_cfg.capable = cfg.pmf_capable;
            sta.pmf_cfg.required = cfg.pmf_required;
            sta.failure_retry_cnt = cfg.failure_retry_cnt;

            check(esp_wifi_set_config(wifi_interface_t_WIFI_IF_STA, &mut raw), false)
        }
    }

    fn get_config(&self) -> Result<StaConfig> {
        unsafe {
            let mut raw: wifi_config_t = core::mem::zeroed();
            check(esp_wifi_get_config(wifi_interface_t_WIFI_IF_STA, &mut raw), false)?;
            let sta = &raw.__bindgen_anon_1.sta;

            let ssid_len = sta.ssid.iter().position(|&b| b == 0).unwrap_or(32);
            let pass_len = sta.password.iter().position(|&b| b == 0).unwrap_or(64);

            let mut cfg = StaConfig::default();
            cfg.ssid = super::bounded(&String::from_utf8_lossy(&sta.ssid[..ssid_len]));
            cfg.password = super::bounded(&String::from_utf8_lossy(&sta.password[..pass_len]));
            cfg.failure_retry_cnt = sta.failure_retry_cnt;
            Ok(cfg)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Event trampolines
// ───────────────────────────────────────────────────────────────

unsafe extern "C" fn wifi_event_trampoline(
    arg: *mut c_void,
    _base: esp_event_base_t,
    id: i32,
    data: *mut c_void,
) {
    if arg.is_null() {
        return;
    }
    let sender = &*(arg as *const EventSender);

    match id as u32 {
        wifi_event_t_WIFI_EVENT_STA_START => {
            sender.push_event(Event::StaStart);
        }
        wifi_event_t_WIFI_EVENT_STA_STOP => {
            sender.push_event(Event::StaStop);
        }
        wifi_event_t_WIFI_EVENT_STA_CONNECTED => {
            sender.push_event(Event::StaConnected);
        }
        wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => {
            let (reason, rssi) = if data.is_null() {
                (0, 0)
            } else {
                let payload = &*(data as *const wifi_event_sta_disconnected_t);
                (payload.reason as u8, payload.rssi)
            };
            sender.push(Event::StaDisconnected, reason, rssi);
        }
        _ => {} // Everything else is noise for the manager.
    }
}

unsafe extern "C" fn ip_event_trampoline(
    arg: *mut c_void,
    _base: esp_event_base_t,
    id: i32,
    _data: *mut c_void,
) {
    if arg.is_null() {
        return;
    }
    let sender = &*(arg as *const EventSender);

    match id as u32 {
        ip_event_t_IP_EVENT_STA_GOT_IP => {
            sender.push_event(Event::GotIp);
        }
        ip_event_t_IP_EVENT_STA_LOST_IP => {
            sender.push_event(Event::LostIp);
        }
        _ => {}
    }
}
