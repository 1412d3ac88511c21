//! NVS (Non-Volatile Storage) configuration for ESP32.
//!
//! The device configuration is stored as one JSON document under
//! `camstream/config`. WiFi credentials baked in at build time
//! (`CAMSTREAM_WIFI_SSID` / `CAMSTREAM_WIFI_PASS`) fill in when NVS has none.

use anyhow::{Context, Result};
use camstream_core::{DeviceConfig, WifiConfig};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{info, warn};

const NVS_NAMESPACE: &str = "camstream";
const CONFIG_KEY: &str = "config";
const CONFIG_BUF_LEN: usize = 2048;

/// Persistent configuration store.
pub struct NvsConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsConfigStore {
    /// Open the camstream namespace read-write.
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .with_context(|| format!("failed to open NVS namespace '{}'", NVS_NAMESPACE))?;
        Ok(Self { nvs })
    }

    /// Whether a configuration document is stored.
    pub fn is_stored(&self) -> Result<bool> {
        Ok(self.nvs.contains(CONFIG_KEY)?)
    }

    /// Load the stored configuration, or defaults when none is stored.
    ///
    /// A stored document that fails to parse is reported and replaced by
    /// defaults rather than bricking the device.
    pub fn load(&self) -> Result<DeviceConfig> {
        let mut buf = [0u8; CONFIG_BUF_LEN];
        let mut config = match self.nvs.get_str(CONFIG_KEY, &mut buf)? {
            Some(json) => match DeviceConfig::from_json_str(json) {
                Ok(config) => {
                    info!("Loaded configuration from NVS");
                    config
                }
                Err(e) => {
                    warn!("Stored configuration is invalid ({}), using defaults", e);
                    DeviceConfig::default()
                }
            },
            None => {
                info!("No stored configuration, using defaults");
                DeviceConfig::default()
            }
        };

        if config.wifi.ssid.is_empty() {
            if let Some(wifi) = build_time_wifi() {
                config.wifi = wifi;
            }
        }
        Ok(config)
    }

    /// Persist `config`, replacing any stored document.
    pub fn save(&mut self, config: &DeviceConfig) -> Result<()> {
        let json = config.to_json()?;
        if json.len() >= CONFIG_BUF_LEN {
            anyhow::bail!(
                "configuration is {} bytes, NVS slot holds {}",
                json.len(),
                CONFIG_BUF_LEN - 1
            );
        }
        self.nvs.set_str(CONFIG_KEY, &json)?;
        info!("Configuration saved to NVS");
        Ok(())
    }
}

fn build_time_wifi() -> Option<WifiConfig> {
    let ssid = option_env!("CAMSTREAM_WIFI_SSID")?;
    Some(WifiConfig {
        ssid: ssid.to_string(),
        password: option_env!("CAMSTREAM_WIFI_PASS").unwrap_or_default().to_string(),
    })
}
