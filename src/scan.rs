//! Scan records and the scan engine.
//!
//! A radio is a capability: "scan for a while, hand back everything you
//! observed". The engine runs one pass per source, resolves labels, and
//! merges the per-source sets into the snapshot served to the web UI and
//! appended to the log.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::identify;

/// Which radio produced a record. Serialized with the wire tags the web UI
/// and the upload endpoint expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioKind {
    #[serde(rename = "BLE")]
    Ble,
    #[serde(rename = "CL")]
    Classic,
}

/// One observed advertisement, as handed back by a radio. Discarded after
/// the pass is merged.
#[derive(Debug, Clone)]
pub struct AdvertisementRecord {
    /// Textual hardware address, `xx:xx:xx:xx:xx:xx`.
    pub addr: String,
    /// Signal strength in dBm.
    pub rssi: i32,
    /// Broadcast name, if the device sent one.
    pub name: Option<String>,
    /// Raw manufacturer-specific payload, if present.
    pub manufacturer_data: Option<Vec<u8>>,
    pub kind: RadioKind,
}

/// An identified device in the current snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub addr: String,
    pub rssi: i32,
    #[serde(rename = "type")]
    pub kind: RadioKind,
    pub name: String,
}

/// Batch-scan capability over one radio source. Blocks for the full scan
/// duration; there is no streaming per-advertisement surface.
pub trait Radio {
    fn scan(&mut self, duration: Duration) -> Result<Vec<AdvertisementRecord>>;
}

/// Holds the latest result set per source. Each pass replaces its own set
/// wholesale; nothing is carried over between cycles.
#[derive(Default)]
pub struct ScanEngine {
    ble: Vec<DeviceRecord>,
    classic: Vec<DeviceRecord>,
}

impl ScanEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the fast pass and replace the BLE result set.
    pub fn ble_pass(&mut self, radio: &mut dyn Radio, duration: Duration) -> Result<()> {
        let found = radio.scan(duration)?;
        self.ble = found.iter().map(Self::to_record).collect();
        Ok(())
    }

    /// Run the slow discovery pass and replace the Classic result set.
    pub fn classic_pass(&mut self, radio: &mut dyn Radio, duration: Duration) -> Result<()> {
        let found = radio.scan(duration)?;
        self.classic = found.iter().map(Self::to_record).collect();
        Ok(())
    }

    fn to_record(adv: &AdvertisementRecord) -> DeviceRecord {
        DeviceRecord {
            addr: adv.addr.clone(),
            rssi: adv.rssi,
            kind: adv.kind,
            name: identify::identify(adv),
        }
    }

    pub fn device_count(&self) -> usize {
        self.ble.len() + self.classic.len()
    }

    /// Merged snapshot: BLE records first, then Classic, each in discovery
    /// order within its pass.
    pub fn merged(&self) -> Vec<DeviceRecord> {
        let mut merged = Vec::with_capacity(self.device_count());
        merged.extend(self.ble.iter().cloned());
        merged.extend(self.classic.iter().cloned());
        merged
    }

    /// The canonical serialized form of the merged snapshot.
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.merged())?)
    }
}
