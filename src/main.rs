#[cfg(feature = "esp32")]
mod firmware {
    use std::thread;
    use std::time::{Duration, Instant};

    use esp_idf_svc::bt::{BtDriver, Duplex};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::fs::littlefs::Littlefs;
    use esp_idf_svc::hal::gpio::{PinDriver, Pull};
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::io::vfs::MountedLittlefs;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info};

    use presence_radar::ble::BleRadio;
    use presence_radar::classic::ClassicRadio;
    use presence_radar::logstore::LogStore;
    use presence_radar::mode::{BootMode, ModeFlag};
    use presence_radar::radar::RadarApp;
    use presence_radar::{server, sync, wifi};

    /// LittleFS partition label and mount point.
    const STORAGE_PARTITION: &str = "storage";
    const MOUNT_POINT: &str = "/littlefs";

    const LOG_PATH: &str = "/littlefs/log.txt";
    const FLAG_PATH: &str = "/littlefs/do_sync";

    /// Debounce re-sample delay for the sync button (GPIO0, active low).
    const DEBOUNCE: Duration = Duration::from_millis(100);
    /// Idle delay per control-loop pass.
    const LOOP_DELAY: Duration = Duration::from_millis(50);

    pub fn main() -> anyhow::Result<()> {
        // It is necessary to call this function once. Otherwise, some patches to the runtime
        // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
        esp_idf_svc::sys::link_patches();

        // Bind the log crate to the ESP Logging facilities
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("=== ESP32 Presence Radar ===");

        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let littlefs = Littlefs::new_partition(STORAGE_PARTITION)?;
        let _fs = MountedLittlefs::mount(littlefs, MOUNT_POINT)?;

        let store = LogStore::new(LOG_PATH);
        let flag = ModeFlag::new(FLAG_PATH);

        // The flag decides the whole boot cycle, checked exactly once and
        // before any radio comes up.
        match flag.boot_mode() {
            BootMode::Sync => sync::run(&store, &flag, peripherals.modem, sys_loop, nvs),
            BootMode::Radar => run_radar(peripherals, sys_loop, nvs, store, flag),
        }
    }

    fn run_radar(
        peripherals: Peripherals,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        store: LogStore,
        flag: ModeFlag,
    ) -> anyhow::Result<()> {
        info!("Radar mode");

        let (wifi_modem, bt_modem) = peripherals.modem.split();

        let _wifi = wifi::start_radar_ap(wifi_modem, sys_loop, nvs.clone())?;
        let _bt = BtDriver::<Duplex>::new(bt_modem, Some(nvs))?;

        let ble_radio = BleRadio::new()?;
        let classic_radio = ClassicRadio::new()?;

        let mut app = RadarApp::new(
            Box::new(ble_radio),
            Some(Box::new(classic_radio)),
            store,
            flag,
        );
        let _server = server::start(app.snapshot_handle())?;

        let mut button = PinDriver::input(peripherals.pins.gpio0)?;
        button.set_pull(Pull::Up)?;

        info!("Radar running; hold the boot button to sync");

        loop {
            app.service(Instant::now());

            // Active low; re-sample after a short delay to reject noise.
            if button.is_low() {
                thread::sleep(DEBOUNCE);
                if button.is_low() {
                    if let Err(err) = app.request_sync() {
                        error!("Sync request failed: {:?}", err);
                    }
                    info!("Rebooting into sync mode...");
                    thread::sleep(Duration::from_millis(200));
                    esp_idf_svc::hal::reset::restart();
                }
            }

            thread::sleep(LOOP_DELAY);
        }
    }
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    firmware::main()
}

// Host builds only carry the testable core; there is nothing to run.
#[cfg(not(feature = "esp32"))]
fn main() {}
