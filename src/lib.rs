//! Hybrid Bluetooth presence radar for the ESP32.
//!
//! Normal operation scans for nearby BLE and Classic Bluetooth devices,
//! identifies them heuristically, serves the latest snapshot over a local
//! access point, and buffers snapshots to an append-only log on flash. A
//! button press reboots the device into a one-shot sync mode that joins the
//! home network, drains the log to a remote endpoint, and reboots back.
//!
//! The core modules below are platform-neutral and host-testable; the
//! ESP32 adapters (radios, Wi-Fi, web server) are gated behind the `esp32`
//! feature.

pub mod identify;
pub mod logstore;
pub mod mode;
pub mod radar;
pub mod scan;
pub mod sync;

#[cfg(feature = "esp32")]
pub mod ble;
#[cfg(feature = "esp32")]
pub mod classic;
#[cfg(feature = "esp32")]
pub mod server;
#[cfg(feature = "esp32")]
pub mod wifi;
