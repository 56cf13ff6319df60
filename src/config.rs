/// Connection settings for one publish/subscribe broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    // Broker hostname or IP address
    pub hostname: &'static str,

    // Broker port (usually 1883)
    pub port: u16,

    // Optional credentials
    pub username: Option<&'static str>,
    pub password: Option<&'static str>,
}

/// How the node spends the time between two samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Stay powered, keep both broker sessions open and poll the admin topic
    Continuous,
    /// Deep sleep between samples, resuming from the continuation record
    DutyCycled,
}

/// Sampling cadence and batch size, the part of the configuration that the
/// admin channel can change at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub sample_interval_seconds: u32,
    pub batch_size: u8,
}

pub struct Config {
    // Device ID (used as DHCP hostname and MQTT client id prefix)
    pub device_id: &'static str,

    // Wi-Fi SSID to connect to
    pub wifi_ssid: &'static str,

    // Wi-Fi pre-shared key (password)
    pub wifi_psk: &'static str,

    // ThingSpeak channel and write API key, together they form the telemetry topic
    pub channel_id: &'static str,
    pub api_key: &'static str,

    // Defaults applied on a cold boot
    pub sample_interval_seconds: u32,
    pub batch_size: u8,

    // Continuous or duty-cycled operation
    pub mode: OperatingMode,

    // Cloud telemetry broker
    pub telemetry: BrokerConfig,

    // Local admin broker
    pub admin: BrokerConfig,
}

impl Config {
    pub const fn defaults(&self) -> RuntimeSettings {
        RuntimeSettings {
            sample_interval_seconds: self.sample_interval_seconds,
            batch_size: self.batch_size,
        }
    }
}

// config values are generated at compile time
include!(concat!(env!("OUT_DIR"), "/config.rs"));
