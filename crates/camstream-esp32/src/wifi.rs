//! WiFi station link for ESP32.
//!
//! [`EspStationLink`] performs one association attempt per call so the
//! retry policy stays in `camstream_core::ConnectionManager`.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use camstream_core::{Backoff, ConnectionManager, Credentials, NetworkLink, Sleeper};
use esp_idf_hal::{modem::Modem, peripheral};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use log::{info, warn};

/// WiFi in station mode.
///
/// Must be kept alive for the connection to remain active.
pub struct EspStationLink {
    wifi: BlockingWifi<EspWifi<'static>>,
    configured: bool,
}

impl EspStationLink {
    /// Bring up the WiFi driver without connecting.
    pub fn new(
        modem: impl peripheral::Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self {
            wifi,
            configured: false,
        })
    }

    /// Whether the station is associated and has an IP lease.
    pub fn is_up(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn configure(&mut self, credentials: &Credentials) -> Result<()> {
        // Lengths are already checked by `Credentials::new`.
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid()
                    .try_into()
                    .map_err(|_| anyhow!("SSID too long (max 32 chars)"))?,
                password: credentials
                    .password()
                    .try_into()
                    .map_err(|_| anyhow!("Password too long (max 64 chars)"))?,
                auth_method: AuthMethod::WPA2Personal,
                ..Default::default()
            }))?;

        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }

        self.configured = true;
        Ok(())
    }
}

impl NetworkLink for EspStationLink {
    type Error = anyhow::Error;

    fn attempt_connect(&mut self, credentials: &Credentials) -> Result<()> {
        if !self.configured {
            self.configure(credentials)?;
        }

        self.wifi.connect()?;

        info!("Waiting for DHCP lease...");
        self.wifi.wait_netif_up()?;

        let ip_info = self.wifi.wifi().sta_netif().get_ip_info()?;
        info!("WiFi connected!");
        info!("  IP address: {}", ip_info.ip);
        info!("  Gateway:    {}", ip_info.subnet.gateway);
        info!("  Netmask:    {}", ip_info.subnet.mask);
        Ok(())
    }

    fn bound_address(&self) -> Option<IpAddr> {
        let ip_info = self.wifi.wifi().sta_netif().get_ip_info().ok()?;
        ip_info.ip.to_string().parse().ok()
    }
}

/// Watch the station link forever, reconnecting when it drops.
///
/// Marking the link disconnected ends any active stream session, then the
/// manager's retry loop runs until the station is back.
pub fn supervise<B: Backoff, Z: Sleeper>(
    manager: &mut ConnectionManager<EspStationLink, B, Z>,
    credentials: &Credentials,
    poll: Duration,
) -> ! {
    loop {
        std::thread::sleep(poll);
        if manager.link().is_up() {
            continue;
        }

        warn!("WiFi link down, reconnecting");
        manager.mark_disconnected();
        let connection = manager.connect(credentials);
        match connection.address {
            Some(ip) => info!("WiFi restored after {} attempt(s), address {}", connection.attempts, ip),
            None => info!("WiFi restored after {} attempt(s)", connection.attempts),
        }
    }
}
