//! Radar mode: the single sequential control loop.
//!
//! One pass services whatever periodic work is due: the fast BLE scan, the
//! slow Classic inquiry, the auto-save of the current snapshot. Scans block
//! the loop for their full duration; during an 8 second inquiry nothing
//! else runs. That latency spike is part of the design, not a bug.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};

use crate::logstore::{LogEntry, LogStore};
use crate::mode::ModeFlag;
use crate::scan::{Radio, ScanEngine};

/// Fast BLE pass cadence and duration.
pub const BLE_SCAN_PERIOD: Duration = Duration::from_secs(4);
pub const BLE_SCAN_DURATION: Duration = Duration::from_secs(2);

/// Slow Classic inquiry cadence and duration (hybrid configurations only).
pub const CLASSIC_SCAN_PERIOD: Duration = Duration::from_secs(45);
pub const CLASSIC_SCAN_DURATION: Duration = Duration::from_secs(8);

/// Snapshot auto-save cadence.
pub const AUTOLOG_PERIOD: Duration = Duration::from_secs(60);

/// Latest serialized snapshot, shared with the web server task. The loop is
/// the only writer, so readers always see a complete array.
pub type SnapshotHandle = Arc<Mutex<String>>;

/// All mutable radar-mode state, passed by reference into the loop instead
/// of living in globals.
pub struct RadarApp {
    ble: Box<dyn Radio>,
    classic: Option<Box<dyn Radio>>,
    engine: ScanEngine,
    store: LogStore,
    flag: ModeFlag,
    snapshot: SnapshotHandle,
    last_ble: Instant,
    last_classic: Instant,
    last_autolog: Instant,
}

impl RadarApp {
    pub fn new(
        ble: Box<dyn Radio>,
        classic: Option<Box<dyn Radio>>,
        store: LogStore,
        flag: ModeFlag,
    ) -> Self {
        let now = Instant::now();
        Self {
            ble,
            classic,
            engine: ScanEngine::new(),
            store,
            flag,
            snapshot: Arc::new(Mutex::new("[]".to_string())),
            last_ble: now,
            last_classic: now,
            last_autolog: now,
        }
    }

    /// Handle for the read-only web API.
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        Arc::clone(&self.snapshot)
    }

    /// One pass of the control loop: run every periodic job that is due at
    /// `now`, in sequence. Each job blocks until it completes.
    pub fn service(&mut self, now: Instant) {
        if now.duration_since(self.last_ble) >= BLE_SCAN_PERIOD {
            if let Err(err) = self.engine.ble_pass(self.ble.as_mut(), BLE_SCAN_DURATION) {
                warn!("BLE scan failed: {:?}", err);
            }
            self.publish_snapshot();
            self.last_ble = now;
        }

        if let Some(classic) = self.classic.as_mut() {
            if now.duration_since(self.last_classic) >= CLASSIC_SCAN_PERIOD {
                info!("Deep scan (Classic) started...");
                if let Err(err) = self.engine.classic_pass(classic.as_mut(), CLASSIC_SCAN_DURATION)
                {
                    warn!("Classic scan failed: {:?}", err);
                }
                info!("Deep scan complete.");
                self.publish_snapshot();
                self.last_classic = now;
            }
        }

        if now.duration_since(self.last_autolog) >= AUTOLOG_PERIOD {
            info!("Auto-saving snapshot...");
            if let Err(err) = self.append_snapshot() {
                warn!("Auto-save failed: {:?}", err);
            }
            self.last_autolog = now;
        }
    }

    /// Operator pressed the sync button: persist the current snapshot as
    /// one final entry and arm the flag. The caller restarts the device.
    pub fn request_sync(&mut self) -> Result<()> {
        info!("Sync requested. Saving snapshot and arming flag...");
        if let Err(err) = self.append_snapshot() {
            warn!("Could not save final snapshot: {:?}", err);
        }
        self.flag.arm()
    }

    fn publish_snapshot(&self) {
        match self.engine.snapshot_json() {
            Ok(json) => {
                if let Ok(mut current) = self.snapshot.lock() {
                    *current = json;
                }
            }
            Err(err) => warn!("Snapshot serialization failed: {:?}", err),
        }
    }

    fn append_snapshot(&self) -> Result<()> {
        let entry = LogEntry {
            count: self.engine.device_count(),
            data: self.engine.snapshot_json()?,
        };
        self.store.append(&entry)
    }
}
