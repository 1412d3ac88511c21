//! camstream firmware for the AI-Thinker ESP32-CAM
//!
//! Joins the configured WiFi network (retrying until it succeeds), starts the
//! camera and serves a live MJPEG stream over HTTP. The main task then
//! supervises the WiFi link for the lifetime of the device.

use anyhow::Result;
use camstream_core::{ConnectionManager, FixedBackoff};
use camstream_esp32::camera::EspCamera;
use camstream_esp32::config::NvsConfigStore;
use camstream_esp32::http::CameraHttpd;
use camstream_esp32::wifi::{self, EspStationLink};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info};

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("camstream ESP32 firmware starting...");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    // Erases and re-initializes the partition when it has no free pages.
    let nvs = EspDefaultNvsPartition::take()?;

    let mut store = NvsConfigStore::open(nvs.clone())?;
    let config = store.load()?;
    let credentials = config.credentials()?;

    // First boot: persist the build-time credentials.
    if !store.is_stored()? {
        store.save(&config)?;
    }

    info!("Connecting to WiFi '{}'...", credentials.ssid());
    let link = EspStationLink::new(peripherals.modem, sysloop, Some(nvs))?;
    let mut manager =
        ConnectionManager::new(link).with_backoff(FixedBackoff::new(config.connection.backoff()));
    let connection = manager.connect(&credentials);
    info!("WiFi connected after {} attempt(s)", connection.attempts);

    let camera = match EspCamera::init(&config.camera) {
        Ok(camera) => camera,
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    };

    let _httpd = CameraHttpd::start(&config.stream, camera, manager.status())?;

    match connection.address {
        Some(ip) => info!("Camera Stream Ready! Go to: {}", config.stream.url_for(ip)),
        None => info!("Camera Stream Ready on route {}", config.stream.route),
    }

    wifi::supervise(&mut manager, &credentials, config.connection.watchdog())
}
