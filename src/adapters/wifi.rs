//! WiFi station bring-up.
//!
//! One-shot STA connection during boot; the returned handle must stay
//! alive for the duration of the session. Credentials are baked in at
//! compile time via `CLIMASTAT_WIFI_SSID` / `CLIMASTAT_WIFI_PASS`.
//!
//! Mid-run WiFi drops are not handled here: the MQTT adapter observes
//! them as a dead session and the control loop keeps reconnecting at the
//! bus level, which rides out DHCP renewals and AP reboots in practice.

#[cfg(target_os = "espidf")]
use esp_idf_hal::delay::FreeRtos;
#[cfg(target_os = "espidf")]
use esp_idf_hal::modem::Modem;
#[cfg(target_os = "espidf")]
use esp_idf_svc::eventloop::EspSystemEventLoop;
#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::EspDefaultNvsPartition;
#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
#[cfg(target_os = "espidf")]
use log::{info, warn};

#[cfg(target_os = "espidf")]
use crate::error::{CommsError, Error, Result};

#[cfg(target_os = "espidf")]
const CONNECT_ATTEMPTS: u32 = 5;
#[cfg(target_os = "espidf")]
const RETRY_DELAY_MS: u32 = 3_000;

#[cfg(target_os = "espidf")]
fn validate_ssid(ssid: &str) -> Result<()> {
    let printable = ssid.bytes().all(|b| (0x20..=0x7E).contains(&b));
    if ssid.is_empty() || ssid.len() > 32 || !printable {
        return Err(Error::Init("SSID must be 1-32 printable ASCII bytes"));
    }
    Ok(())
}

/// Bring up the station interface and block until connected.
#[cfg(target_os = "espidf")]
pub fn connect_station(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<BlockingWifi<EspWifi<'static>>> {
    let ssid = option_env!("CLIMASTAT_WIFI_SSID")
        .ok_or(Error::Init("CLIMASTAT_WIFI_SSID not set at build time"))?;
    let pass = option_env!("CLIMASTAT_WIFI_PASS").unwrap_or("");
    validate_ssid(ssid)?;

    let esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))
        .map_err(|_| Error::Init("WiFi driver init failed"))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)
        .map_err(|_| Error::Init("WiFi event loop wrap failed"))?;

    let auth_method = if pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|()| Error::Init("SSID too long"))?,
        password: pass
            .try_into()
            .map_err(|()| Error::Init("password too long"))?,
        auth_method,
        ..Default::default()
    }))
    .map_err(|_| Error::Init("WiFi configuration rejected"))?;

    wifi.start().map_err(|_| Error::Init("WiFi start failed"))?;

    for attempt in 1..=CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("WiFi connected to `{ssid}`");
                return Ok(wifi);
            }
            Err(e) => {
                warn!("WiFi connect attempt {attempt}/{CONNECT_ATTEMPTS} failed: {e}");
                FreeRtos::delay_ms(RETRY_DELAY_MS);
            }
        }
    }
    Err(Error::Comms(CommsError::ConnectFailed))
}
