use anyhow::{Context, Result};
use core::convert::TryInto;
use embedded_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::WifiModemPeripheral, peripheral::Peripheral},
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use std::thread;
use std::time::Duration;

const SSID: &str = env!("HOME_SSID");
const PASSWORD: &str = env!("HOME_PASS");

/// SSID of the open access point the radar serves its UI on.
const AP_SSID: &str = "Presence Radar";

/// Bounded join: a fixed number of connect attempts with a fixed delay in
/// between, then give up so sync mode can still finish.
const JOIN_ATTEMPTS: u32 = 3;
const JOIN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Join the configured home network for the sync drain. Never retries
/// indefinitely.
pub fn join_home_network<M: WifiModemPeripheral>(
    modem: impl Peripheral<P = M> + 'static,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<BlockingWifi<EspWifi<'static>>> {
    info!("Connecting to home Wi-Fi - SSID: '{}'", SSID);

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;

    let wifi_configuration = Configuration::Client(ClientConfiguration {
        ssid: SSID.try_into().unwrap(),
        password: PASSWORD.try_into().unwrap(),
        auth_method: AuthMethod::WPA2Personal,
        ..Default::default()
    });

    wifi.set_configuration(&wifi_configuration)?;
    wifi.start()?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => break,
            Err(err) if attempt < JOIN_ATTEMPTS => {
                warn!(
                    "Join attempt {}/{} failed: {}",
                    attempt, JOIN_ATTEMPTS, err
                );
                thread::sleep(JOIN_RETRY_DELAY);
            }
            Err(err) => return Err(err).context("home network join gave up"),
        }
    }

    // Captive-portal style resolvers on some home routers break the upload
    // endpoint; pin public DNS instead.
    if let Err(err) = force_public_dns(wifi.wifi()) {
        warn!("Could not override DNS servers: {:?}", err);
    }

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("WiFi connected - IP: {}", ip_info.ip);

    Ok(wifi)
}

/// Bring up the open access point the radar UI is served on.
pub fn start_radar_ap<M: WifiModemPeripheral>(
    modem: impl Peripheral<P = M> + 'static,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<BlockingWifi<EspWifi<'static>>> {
    info!("Starting access point '{}'", AP_SSID);

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;

    let wifi_configuration = Configuration::AccessPoint(AccessPointConfiguration {
        ssid: AP_SSID.try_into().unwrap(),
        auth_method: AuthMethod::None,
        ..Default::default()
    });

    wifi.set_configuration(&wifi_configuration)?;
    wifi.start()?;
    wifi.wait_netif_up()?;

    let ip_info = wifi.wifi().ap_netif().get_ip_info()?;
    info!("Radar IP: {}", ip_info.ip);

    Ok(wifi)
}

/// Point the station netif at well-known public resolvers.
fn force_public_dns(wifi: &EspWifi<'static>) -> Result<()> {
    use esp_idf_svc::handle::RawHandle;
    use esp_idf_svc::sys::{
        esp_netif_dns_info_t, esp_netif_dns_type_t_ESP_NETIF_DNS_BACKUP,
        esp_netif_dns_type_t_ESP_NETIF_DNS_MAIN, esp_netif_set_dns_info, ESP_OK,
        ESP_IPADDR_TYPE_V4,
    };

    let netif = wifi.sta_netif();
    let servers = [
        (esp_netif_dns_type_t_ESP_NETIF_DNS_MAIN, [8u8, 8, 8, 8]),
        (esp_netif_dns_type_t_ESP_NETIF_DNS_BACKUP, [8u8, 8, 4, 4]),
    ];

    for (slot, addr) in servers {
        let mut dns_info = esp_netif_dns_info_t::default();
        unsafe {
            dns_info.ip.type_ = ESP_IPADDR_TYPE_V4 as u8;
            dns_info.ip.u_addr.ip4.addr = u32::from_le_bytes(addr);
            let ret = esp_netif_set_dns_info(netif.handle(), slot, &mut dns_info);
            if ret != ESP_OK {
                anyhow::bail!("esp_netif_set_dns_info failed: {}", ret);
            }
        }
    }

    Ok(())
}
