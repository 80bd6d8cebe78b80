//! BLE fast-pass radio over the Bluedroid GAP scanner.
//!
//! The scan is a synchronous batch call: start an active scan, block until
//! the controller reports completion, hand back everything observed. The
//! GAP callback only appends to a static buffer; all interpretation happens
//! in [`crate::identify`].

use esp_idf_svc::sys::{
    esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC, esp_ble_gap_cb_param_t,
    esp_ble_gap_register_callback, esp_ble_gap_set_scan_params, esp_ble_gap_start_scanning,
    esp_ble_gap_stop_scanning, esp_ble_scan_duplicate_t_BLE_SCAN_DUPLICATE_ENABLE,
    esp_ble_scan_filter_t_BLE_SCAN_FILTER_ALLOW_ALL, esp_ble_scan_params_t,
    esp_ble_scan_type_t_BLE_SCAN_TYPE_ACTIVE, esp_gap_ble_cb_event_t,
    esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RESULT_EVT,
    esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_CMPL_EVT,
    esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_RES_EVT, ESP_OK,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::warn;

use crate::scan::{AdvertisementRecord, Radio, RadioKind};

/// Set from the GAP callback once the inquiry window has elapsed.
static SCAN_COMPLETE: AtomicBool = AtomicBool::new(false);

/// Advertisements observed during the current scan window.
static RESULTS: Mutex<Vec<AdvertisementRecord>> = Mutex::new(Vec::new());

/// Extra time granted past the requested window before giving up on the
/// completion event.
const COMPLETION_GRACE: Duration = Duration::from_secs(2);

/// AD structure type codes (Core Spec Supplement, Part A). Classic EIR uses
/// the same layout, so `classic` shares this parser.
const AD_TYPE_NAME_SHORT: u8 = 0x08;
const AD_TYPE_NAME_COMPLETE: u8 = 0x09;
const AD_TYPE_MANUFACTURER: u8 = 0xFF;

/// Bluetooth device address wrapper for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr(pub [u8; 6]);

impl core::fmt::Display for BdAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Walk the length-type-value structures of an advertising (or EIR) payload
/// and pull out the broadcast name and the manufacturer payload.
pub(crate) fn parse_ltv_fields(data: &[u8]) -> (Option<String>, Option<Vec<u8>>) {
    let mut name: Option<String> = None;
    let mut manufacturer: Option<Vec<u8>> = None;

    let mut rest = data;
    while rest.len() >= 2 {
        let len = rest[0] as usize;
        if len == 0 || len + 1 > rest.len() {
            break;
        }
        let (field, tail) = rest[1..].split_at(len);
        let (ad_type, value) = (field[0], &field[1..]);
        match ad_type {
            AD_TYPE_NAME_COMPLETE => {
                name = Some(String::from_utf8_lossy(value).into_owned());
            }
            AD_TYPE_NAME_SHORT => {
                // A complete name wins over a shortened one.
                if name.is_none() {
                    name = Some(String::from_utf8_lossy(value).into_owned());
                }
            }
            AD_TYPE_MANUFACTURER => manufacturer = Some(value.to_vec()),
            _ => {}
        }
        rest = tail;
    }

    (name, manufacturer)
}

/// Fold repeated reports of one device (advertisement and scan response
/// arrive separately) into a single record, keeping discovery order.
pub(crate) fn merge_record(results: &mut Vec<AdvertisementRecord>, record: AdvertisementRecord) {
    if let Some(existing) = results.iter_mut().find(|r| r.addr == record.addr) {
        existing.rssi = record.rssi;
        if existing.name.is_none() {
            existing.name = record.name;
        }
        if existing.manufacturer_data.is_none() {
            existing.manufacturer_data = record.manufacturer_data;
        }
    } else {
        results.push(record);
    }
}

/// GAP event callback
/// WARNING: Called directly in the Bluedroid task - keep it minimal!
unsafe extern "C" fn gap_event_handler(
    event: esp_gap_ble_cb_event_t,
    param: *mut esp_ble_gap_cb_param_t,
) {
    if param.is_null() || event != esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RESULT_EVT {
        return;
    }

    let result = &(*param).scan_rst;

    if result.search_evt == esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_CMPL_EVT {
        SCAN_COMPLETE.store(true, Ordering::SeqCst);
        return;
    }
    if result.search_evt != esp_gap_search_evt_t_ESP_GAP_SEARCH_INQ_RES_EVT {
        return;
    }

    // Advertisement and scan-response data share one buffer.
    let payload_len =
        (result.adv_data_len as usize + result.scan_rsp_len as usize).min(result.ble_adv.len());
    let (name, manufacturer_data) = parse_ltv_fields(&result.ble_adv[..payload_len]);

    let record = AdvertisementRecord {
        addr: BdAddr(result.bda).to_string(),
        rssi: result.rssi,
        name,
        manufacturer_data,
        kind: RadioKind::Ble,
    };

    if let Ok(mut results) = RESULTS.lock() {
        merge_record(&mut results, record);
    }
}

/// Active BLE scanner. The Bluedroid stack must already be up.
pub struct BleRadio {
    _private: (),
}

impl BleRadio {
    /// Register the GAP callback and configure the active scan once.
    pub fn new() -> Result<Self> {
        unsafe {
            let ret = esp_ble_gap_register_callback(Some(gap_event_handler));
            if ret != ESP_OK {
                anyhow::bail!("Failed to register BLE GAP callback: {}", ret);
            }

            let mut scan_params = esp_ble_scan_params_t {
                scan_type: esp_ble_scan_type_t_BLE_SCAN_TYPE_ACTIVE,
                own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
                scan_filter_policy: esp_ble_scan_filter_t_BLE_SCAN_FILTER_ALLOW_ALL,
                scan_interval: 0x50, // 50 ms units of 0.625 ms
                scan_window: 0x30,   // 30 ms units of 0.625 ms
                scan_duplicate: esp_ble_scan_duplicate_t_BLE_SCAN_DUPLICATE_ENABLE,
            };
            let ret = esp_ble_gap_set_scan_params(&mut scan_params);
            if ret != ESP_OK {
                anyhow::bail!("Failed to set BLE scan params: {}", ret);
            }
        }

        Ok(Self { _private: () })
    }
}

impl Radio for BleRadio {
    fn scan(&mut self, duration: Duration) -> Result<Vec<AdvertisementRecord>> {
        if let Ok(mut results) = RESULTS.lock() {
            results.clear();
        }
        SCAN_COMPLETE.store(false, Ordering::SeqCst);

        let seconds = duration.as_secs().max(1) as u32;
        let ret = unsafe { esp_ble_gap_start_scanning(seconds) };
        if ret != ESP_OK {
            anyhow::bail!("Failed to start BLE scan: {}", ret);
        }

        // Block until the stack reports completion; the control loop has
        // nothing else to do during a pass.
        let deadline = Instant::now() + duration + COMPLETION_GRACE;
        while !SCAN_COMPLETE.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                warn!("BLE scan completion timed out, stopping scan");
                let ret = unsafe { esp_ble_gap_stop_scanning() };
                if ret != ESP_OK {
                    warn!("Failed to stop BLE scan: {}", ret);
                }
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }

        let results = RESULTS
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default();
        Ok(results)
    }
}
