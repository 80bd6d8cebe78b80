//! Classic Bluetooth slow-pass radio (Bluedroid inquiry).
//!
//! A general inquiry blocks for its full window, which stalls the whole
//! control loop for around eight seconds. Accepted: the deep scan is rare
//! and the radar has no preemption.

use esp_idf_svc::sys::{
    esp_bt_gap_cancel_discovery, esp_bt_gap_cb_event_t,
    esp_bt_gap_cb_event_t_ESP_BT_GAP_DISC_RES_EVT,
    esp_bt_gap_cb_event_t_ESP_BT_GAP_DISC_STATE_CHANGED_EVT, esp_bt_gap_cb_param_t,
    esp_bt_gap_dev_prop_type_t_ESP_BT_GAP_DEV_PROP_BDNAME,
    esp_bt_gap_dev_prop_type_t_ESP_BT_GAP_DEV_PROP_EIR,
    esp_bt_gap_dev_prop_type_t_ESP_BT_GAP_DEV_PROP_RSSI,
    esp_bt_gap_discovery_state_t_ESP_BT_GAP_DISCOVERY_STOPPED, esp_bt_gap_register_callback,
    esp_bt_gap_start_discovery, esp_bt_inq_mode_t_ESP_BT_INQ_MODE_GENERAL_INQUIRY, ESP_OK,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::warn;

use crate::ble::{merge_record, parse_ltv_fields, BdAddr};
use crate::scan::{AdvertisementRecord, Radio, RadioKind};

/// Set from the GAP callback when the inquiry stops.
static DISCOVERY_COMPLETE: AtomicBool = AtomicBool::new(false);

/// Devices observed during the current inquiry.
static RESULTS: Mutex<Vec<AdvertisementRecord>> = Mutex::new(Vec::new());

/// Extra time granted past the requested window before cancelling.
const COMPLETION_GRACE: Duration = Duration::from_secs(3);

/// GAP event callback
/// WARNING: Called directly in the Bluedroid task - keep it minimal!
unsafe extern "C" fn gap_event_handler(
    event: esp_bt_gap_cb_event_t,
    param: *mut esp_bt_gap_cb_param_t,
) {
    if param.is_null() {
        return;
    }

    if event == esp_bt_gap_cb_event_t_ESP_BT_GAP_DISC_STATE_CHANGED_EVT {
        if (*param).disc_st_chg.state == esp_bt_gap_discovery_state_t_ESP_BT_GAP_DISCOVERY_STOPPED
        {
            DISCOVERY_COMPLETE.store(true, Ordering::SeqCst);
        }
        return;
    }
    if event != esp_bt_gap_cb_event_t_ESP_BT_GAP_DISC_RES_EVT {
        return;
    }

    let result = &(*param).disc_res;
    let mut rssi: i32 = 0;
    let mut name: Option<String> = None;

    let props = std::slice::from_raw_parts(result.prop, result.num_prop.max(0) as usize);
    for prop in props {
        if prop.type_ == esp_bt_gap_dev_prop_type_t_ESP_BT_GAP_DEV_PROP_RSSI {
            rssi = *(prop.val as *const i8) as i32;
        } else if prop.type_ == esp_bt_gap_dev_prop_type_t_ESP_BT_GAP_DEV_PROP_BDNAME {
            let bytes = std::slice::from_raw_parts(prop.val as *const u8, prop.len.max(0) as usize);
            let parsed = String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .to_string();
            if !parsed.is_empty() {
                name = Some(parsed);
            }
        } else if prop.type_ == esp_bt_gap_dev_prop_type_t_ESP_BT_GAP_DEV_PROP_EIR {
            let eir = std::slice::from_raw_parts(prop.val as *const u8, prop.len.max(0) as usize);
            let (eir_name, _) = parse_ltv_fields(eir);
            if name.is_none() {
                name = eir_name;
            }
        }
    }

    let record = AdvertisementRecord {
        addr: BdAddr(result.bda).to_string(),
        rssi,
        name,
        // Classic inquiry responses carry no usable company tag here; the
        // identifier falls back to the name or the OUI.
        manufacturer_data: None,
        kind: RadioKind::Classic,
    };

    if let Ok(mut results) = RESULTS.lock() {
        merge_record(&mut results, record);
    }
}

/// Classic inquiry scanner. The Bluedroid stack must already be up.
pub struct ClassicRadio {
    _private: (),
}

impl ClassicRadio {
    /// Register the Classic GAP callback once.
    pub fn new() -> Result<Self> {
        let ret = unsafe { esp_bt_gap_register_callback(Some(gap_event_handler)) };
        if ret != ESP_OK {
            anyhow::bail!("Failed to register Classic GAP callback: {}", ret);
        }
        Ok(Self { _private: () })
    }
}

impl Radio for ClassicRadio {
    fn scan(&mut self, duration: Duration) -> Result<Vec<AdvertisementRecord>> {
        if let Ok(mut results) = RESULTS.lock() {
            results.clear();
        }
        DISCOVERY_COMPLETE.store(false, Ordering::SeqCst);

        // Inquiry length is expressed in 1.28 s units.
        let units = (duration.as_millis() / 1280).max(1) as u8;
        let ret = unsafe {
            esp_bt_gap_start_discovery(esp_bt_inq_mode_t_ESP_BT_INQ_MODE_GENERAL_INQUIRY, units, 0)
        };
        if ret != ESP_OK {
            anyhow::bail!("Failed to start Classic discovery: {}", ret);
        }

        let deadline = Instant::now() + duration + COMPLETION_GRACE;
        while !DISCOVERY_COMPLETE.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                warn!("Classic discovery timed out, cancelling");
                let ret = unsafe { esp_bt_gap_cancel_discovery() };
                if ret != ESP_OK {
                    warn!("Failed to cancel Classic discovery: {}", ret);
                }
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        let results = RESULTS
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default();
        Ok(results)
    }
}
