use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub mqtt: Mqtt,
    pub device: Device,

    #[serde(default)]
    pub timing: Timing,

    #[serde(default = "Config::default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Device {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    /// Topic identifier, eg EZMCOGX000001
    pub id: String,

    #[serde(default = "Config::default_read_password")]
    pub read_password: String,
    #[serde(default = "Config::default_device_serial")]
    pub device_serial: String,
    #[serde(default = "Config::default_unlock_password")]
    pub unlock_password: String,

    pub ct_write_register: Option<Register>,
}
impl Device {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn read_password(&self) -> &str {
        &self.read_password
    }

    pub fn device_serial(&self) -> &str {
        &self.device_serial
    }

    pub fn unlock_password(&self) -> &str {
        &self.unlock_password
    }

    pub fn write_register(&self, setting: Setting) -> Option<Register> {
        match setting {
            Setting::CtEnabled => self.ct_write_register,
            _ => setting.write_register(),
        }
    }
} // }}}

// Timing {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Timing {
    #[serde(default = "Timing::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "Timing::default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "Timing::default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "Timing::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
            settle_ms: Self::default_settle_ms(),
            tick_ms: Self::default_tick_ms(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
        }
    }
}

impl Timing {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn default_timeout_secs() -> u64 {
        6
    }

    fn default_settle_ms() -> u64 {
        800
    }

    fn default_tick_ms() -> u64 {
        500
    }

    fn default_connect_timeout_secs() -> u64 {
        10
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        // Config is only ever replaced wholesale, a poisoned lock still holds a usable value
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn device(&self) -> Device {
        self.lock().device.clone()
    }

    /// Rebinds to another device topic, eg from a command line override.
    pub fn set_device_id(&self, id: String) {
        info!("Using device {}", id);
        self.lock().device.id = id;
    }

    pub fn timing(&self) -> Timing {
        self.lock().timing.clone()
    }

    pub fn log_capacity(&self) -> usize {
        self.lock().log_capacity
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;

        info!("Configuration loaded successfully:");
        info!("  MQTT:");
        info!("    Host: {}", config.mqtt.host);
        info!("    Port: {}", config.mqtt.port);
        info!("    Namespace: {}", config.mqtt.namespace);
        info!("  Device: {}", config.device.id);
        info!("    Device Serial: {}", config.device.device_serial);
        if let Some(r) = config.device.ct_write_register {
            info!("    CT Write Register: {}", r);
        }
        info!("  Timing:");
        info!("    Timeout: {}s", config.timing.timeout_secs);
        info!("    Settle: {}ms", config.timing.settle_ms);
        info!("    Tick: {}ms", config.timing.tick_ms);
        info!("  Response Log Capacity: {}", config.log_capacity);
        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.port == 0 {
            bail!("mqtt.port must be between 1 and 65535");
        }
        if self.mqtt.host.is_empty() {
            return Err(anyhow!("config.rs:MQTT host cannot be empty"));
        }

        if self.device.id.is_empty() || self.device.id.contains(['/', '+', '#']) {
            bail!("device.id {:?} is not a valid topic segment", self.device.id);
        }
        Self::validate_digits("device.read_password", &self.device.read_password, 5)?;
        Self::validate_digits("device.device_serial", &self.device.device_serial, 10)?;
        Self::validate_digits("device.unlock_password", &self.device.unlock_password, 5)?;

        if self.timing.timeout_secs == 0 {
            return Err(anyhow!("config.rs:Invalid timeout: 0"));
        }
        if self.timing.tick_ms == 0 {
            return Err(anyhow!("config.rs:Invalid tick interval: 0"));
        }
        if self.log_capacity == 0 {
            return Err(anyhow!("config.rs:log_capacity must be at least 1"));
        }

        Ok(())
    }

    fn validate_digits(name: &str, value: &str, len: usize) -> Result<()> {
        if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
            bail!("{} must be exactly {} digits", name, len);
        }
        Ok(())
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "/AC/5".to_string()
    }

    fn default_read_password() -> String {
        "12345".to_string()
    }

    fn default_device_serial() -> String {
        "1234567890".to_string()
    }

    fn default_unlock_password() -> String {
        "02014".to_string()
    }

    fn default_log_capacity() -> usize {
        crate::response_log::DEFAULT_CAPACITY
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = "
mqtt:
  host: broker.local
device:
  id: EZMCOGX000001
";

    #[test]
    fn minimal_config_gets_defaults() -> Result<()> {
        let config = Config::from_yaml(MINIMAL)?;

        assert_eq!(config.mqtt.port(), 1883);
        assert_eq!(config.mqtt.namespace(), "/AC/5");
        assert_eq!(config.device.read_password(), "12345");
        assert_eq!(config.device.device_serial(), "1234567890");
        assert_eq!(config.device.unlock_password(), "02014");
        assert_eq!(config.timing.timeout(), Duration::from_secs(6));
        assert_eq!(config.timing.settle(), Duration::from_millis(800));
        assert_eq!(config.log_capacity, 100);
        assert_eq!(config.device.write_register(Setting::CtEnabled), None);
        assert_eq!(
            config.device.write_register(Setting::VoltageUpper),
            Some(Register::new(1566))
        );

        Ok(())
    }

    #[test]
    fn reads_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            "{}  ct_write_register: \"1538\"\ntiming:\n  settle_ms: 1200\n",
            MINIMAL
        )?;

        let config = ConfigWrapper::new(file.path().to_string_lossy().into_owned())?;
        assert_eq!(config.timing().settle(), Duration::from_millis(1200));
        assert_eq!(config.timing().timeout(), Duration::from_secs(6));
        assert_eq!(
            config.device().write_register(Setting::CtEnabled),
            Some(Register::new(1538))
        );

        config.set_device_id("EZMCOGX000042".to_string());
        assert_eq!(config.device().id(), "EZMCOGX000042");

        Ok(())
    }

    #[test]
    fn rejects_bad_credentials() {
        let yaml = format!("{}  device_serial: \"12345\"\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());

        let yaml = format!("{}  unlock_password: \"2014\"\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_wildcard_device() {
        let yaml = MINIMAL.replace("EZMCOGX000001", "EZMCOGX/#");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_bad_register() {
        let yaml = format!("{}  ct_write_register: \"15\"\n", MINIMAL);
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
