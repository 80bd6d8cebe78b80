//! Read-only web view over the current snapshot.
//!
//! Two routes: the static UI page from flash and the serialized scan
//! result. The server runs on its own ESP-IDF task; it only ever reads the
//! shared snapshot string, which the control loop replaces atomically.

use anyhow::Result;
use embedded_svc::{http::Method, io::Write};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use log::info;

use crate::radar::SnapshotHandle;

/// Static UI page, flashed alongside the firmware. Missing is fine.
const INDEX_PATH: &str = "/littlefs/index.html";

pub fn start(snapshot: SnapshotHandle) -> Result<EspHttpServer<'static>> {
    let mut server = EspHttpServer::new(&Configuration::default())?;

    server.fn_handler("/", Method::Get, |request| -> anyhow::Result<()> {
        match std::fs::read(INDEX_PATH) {
            Ok(body) => {
                let mut response =
                    request.into_response(200, None, &[("Content-Type", "text/html")])?;
                response.write_all(&body)?;
            }
            Err(_) => {
                let mut response =
                    request.into_response(404, Some("Not Found"), &[("Content-Type", "text/plain")])?;
                response.write_all(b"Radar UI Missing")?;
            }
        }
        Ok(())
    })?;

    server.fn_handler("/api/scan", Method::Get, move |request| -> anyhow::Result<()> {
        let body = snapshot
            .lock()
            .map(|current| current.clone())
            .unwrap_or_else(|_| "[]".to_string());
        let mut response =
            request.into_response(200, None, &[("Content-Type", "application/json")])?;
        response.write_all(body.as_bytes())?;
        Ok(())
    })?;

    info!("Web server started");
    Ok(server)
}
