//! One-shot sync drain.
//!
//! Runs only in the SYNC boot cycle: join the home network, push every
//! buffered log entry to the remote endpoint, wipe the log, clear the flag,
//! restart. Every failure path still ends in the restart, so the device can
//! never get stuck in sync mode.

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::logstore::{LogEntry, LogStore};

/// Envelope the remote endpoint expects for one drained entry.
#[derive(Debug, Serialize)]
pub struct UploadEnvelope {
    pub count: usize,
    pub logs: Value,
}

impl UploadEnvelope {
    /// Repackage a stored entry. The stored `data` field holds the snapshot
    /// array as a string; the endpoint wants the array itself.
    pub fn from_entry(entry: &LogEntry) -> Result<Self> {
        let logs: Value = serde_json::from_str(&entry.data)?;
        Ok(Self {
            count: entry.count,
            logs,
        })
    }
}

/// Capability: deliver one envelope, returning the final HTTP status code
/// after redirects.
pub trait UploadTransport {
    fn post(&mut self, envelope: &UploadEnvelope) -> Result<u16>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub uploaded: u32,
    pub failed: u32,
}

/// Drain the whole store, best effort. A failed entry is logged and the
/// drain moves on; afterwards the file is deleted regardless, so entries
/// that failed to upload are lost. That trade-off is deliberate.
pub fn drain(store: &LogStore, transport: &mut dyn UploadTransport) -> Result<DrainReport> {
    let mut report = DrainReport::default();

    for entry in store.read_all()? {
        let envelope = match UploadEnvelope::from_entry(&entry) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Skipping undecodable entry: {}", err);
                report.failed += 1;
                continue;
            }
        };
        match transport.post(&envelope) {
            Ok(status) if (200..300).contains(&status) => {
                info!("Uploaded: {}", status);
                report.uploaded += 1;
            }
            Ok(status) => {
                warn!("Failed: HTTP {}", status);
                report.failed += 1;
            }
            Err(err) => {
                warn!("Failed: {}", err);
                report.failed += 1;
            }
        }
    }

    if report.uploaded == 0 && report.failed == 0 {
        info!("No logs found.");
    }

    store.clear()?;
    if report.uploaded > 0 || report.failed > 0 {
        info!("Logs wiped.");
    }
    Ok(report)
}

#[cfg(feature = "esp32")]
pub use esp::{run, EspTransport};

#[cfg(feature = "esp32")]
mod esp {
    use std::thread;
    use std::time::Duration;

    use anyhow::Result;
    use embedded_svc::http::client::Client;
    use embedded_svc::io::Write;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::http::client::{
        Configuration as HttpConfiguration, EspHttpConnection, FollowRedirectsPolicy,
    };
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info, warn};

    use super::{drain, UploadEnvelope, UploadTransport};
    use crate::logstore::LogStore;
    use crate::mode::ModeFlag;
    use crate::wifi;

    /// Deployment-specific endpoint identifier (from environment).
    const SCRIPT_ID: &str = env!("SCRIPT_ID");

    /// HTTPS transport against the deployment's script endpoint.
    pub struct EspTransport {
        client: Client<EspHttpConnection>,
        url: String,
    }

    impl EspTransport {
        pub fn new(script_id: &str) -> Result<Self> {
            let connection = EspHttpConnection::new(&HttpConfiguration {
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                follow_redirects_policy: FollowRedirectsPolicy::FollowAll,
                ..Default::default()
            })?;
            Ok(Self {
                client: Client::wrap(connection),
                url: format!("https://script.google.com/macros/s/{}/exec", script_id),
            })
        }
    }

    impl UploadTransport for EspTransport {
        fn post(&mut self, envelope: &UploadEnvelope) -> Result<u16> {
            let payload = serde_json::to_string(envelope)?;
            let headers = [("Content-Type", "application/json")];
            let mut request = self.client.post(&self.url, &headers)?;
            request.write_all(payload.as_bytes())?;
            request.flush()?;
            let response = request.submit()?;
            Ok(response.status())
        }
    }

    /// The whole SYNC boot cycle. Never returns: always ends in a restart
    /// back to radar mode, whether or not anything uploaded.
    pub fn run(
        store: &LogStore,
        flag: &ModeFlag,
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> ! {
        info!("Sync mode started");

        match wifi::join_home_network(modem, sys_loop, nvs) {
            Ok(_wifi) => match EspTransport::new(SCRIPT_ID) {
                Ok(mut transport) => match drain(store, &mut transport) {
                    Ok(report) => info!(
                        "Drain finished: {} uploaded, {} failed",
                        report.uploaded, report.failed
                    ),
                    Err(err) => error!("Drain failed: {:?}", err),
                },
                Err(err) => error!("HTTP client setup failed: {:?}", err),
            },
            // The log survives for the next sync attempt; only the flag goes.
            Err(err) => warn!("Home Wi-Fi connection failed: {:?}", err),
        }

        if let Err(err) = flag.clear() {
            error!("Failed to clear sync flag: {:?}", err);
        }

        info!("Restarting to radar mode...");
        thread::sleep(Duration::from_secs(1));
        esp_idf_svc::hal::reset::restart()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstore::{LogEntry, LogStore};
    use serde_json::json;
    use tempfile::TempDir;

    /// Records every envelope and answers with a scripted status per call.
    struct MockTransport {
        statuses: Vec<Result<u16>>,
        posted: Vec<Value>,
    }

    impl MockTransport {
        fn with_statuses(statuses: Vec<Result<u16>>) -> Self {
            Self {
                statuses,
                posted: Vec::new(),
            }
        }
    }

    impl UploadTransport for MockTransport {
        fn post(&mut self, envelope: &UploadEnvelope) -> Result<u16> {
            self.posted
                .push(serde_json::to_value(envelope).expect("envelope serializes"));
            if self.statuses.is_empty() {
                Ok(200)
            } else {
                self.statuses.remove(0)
            }
        }
    }

    fn store_with_entries(dir: &TempDir, entries: &[LogEntry]) -> LogStore {
        let store = LogStore::new(dir.path().join("log.txt"));
        for entry in entries {
            store.append(entry).unwrap();
        }
        store
    }

    #[test]
    fn test_envelope_unwraps_data_string_into_array() {
        let entry = LogEntry {
            count: 2,
            data: r#"[{"addr":"aa:aa:aa:00:00:01","rssi":-40,"type":"BLE","name":"-"},{"addr":"bb:bb:bb:00:00:01","rssi":-60,"type":"CL","name":"X"}]"#.to_string(),
        };
        let envelope = UploadEnvelope::from_entry(&entry).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["count"], 2);
        assert!(value["logs"].is_array());
        assert_eq!(value["logs"].as_array().unwrap().len(), 2);
        assert_eq!(value["logs"][1]["name"], "X");
    }

    #[test]
    fn test_drain_posts_every_entry_in_order_then_clears() {
        let dir = TempDir::new().unwrap();
        let store = store_with_entries(
            &dir,
            &[
                LogEntry {
                    count: 1,
                    data: r#"[{"addr":"aa:aa:aa:00:00:01","rssi":-40,"type":"BLE","name":"-"}]"#
                        .to_string(),
                },
                LogEntry {
                    count: 0,
                    data: "[]".to_string(),
                },
            ],
        );
        let mut transport = MockTransport::with_statuses(vec![]);

        let report = drain(&store, &mut transport).unwrap();
        assert_eq!(report, DrainReport { uploaded: 2, failed: 0 });
        assert_eq!(transport.posted.len(), 2);
        assert_eq!(transport.posted[0]["count"], 1);
        assert_eq!(transport.posted[1]["logs"], json!([]));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_failed_entry_does_not_abort_the_drain() {
        let dir = TempDir::new().unwrap();
        let entries: Vec<LogEntry> = (0..3)
            .map(|i| LogEntry {
                count: i,
                data: "[]".to_string(),
            })
            .collect();
        let store = store_with_entries(&dir, &entries);
        let mut transport = MockTransport::with_statuses(vec![
            Ok(200),
            Err(anyhow::anyhow!("connection reset")),
            Ok(500),
        ]);

        let report = drain(&store, &mut transport).unwrap();
        assert_eq!(report, DrainReport { uploaded: 1, failed: 2 });
        assert_eq!(transport.posted.len(), 3);
        // The file is gone even though two entries never made it.
        assert!(!store.path().exists());
    }

    #[test]
    fn test_empty_store_drains_with_zero_posts() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::new(dir.path().join("log.txt"));
        let mut transport = MockTransport::with_statuses(vec![]);

        let report = drain(&store, &mut transport).unwrap();
        assert_eq!(report, DrainReport::default());
        assert!(transport.posted.is_empty());
    }

    #[test]
    fn test_undecodable_data_counts_as_failure_but_continues() {
        let dir = TempDir::new().unwrap();
        let store = store_with_entries(
            &dir,
            &[
                LogEntry {
                    count: 1,
                    data: "not an array".to_string(),
                },
                LogEntry {
                    count: 0,
                    data: "[]".to_string(),
                },
            ],
        );
        let mut transport = MockTransport::with_statuses(vec![]);

        let report = drain(&store, &mut transport).unwrap();
        assert_eq!(report, DrainReport { uploaded: 1, failed: 1 });
        assert_eq!(transport.posted.len(), 1);
    }

    #[test]
    fn test_redirect_status_without_follow_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let store = store_with_entries(
            &dir,
            &[LogEntry {
                count: 0,
                data: "[]".to_string(),
            }],
        );
        let mut transport = MockTransport::with_statuses(vec![Ok(302)]);

        let report = drain(&store, &mut transport).unwrap();
        assert_eq!(report, DrainReport { uploaded: 0, failed: 1 });
    }
}
