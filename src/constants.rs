/// Current firmware version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of the heap in DRAM (internal memory)
pub const HEAP_SIZE: usize = 72 * 1024;

/// Size of the TCP socket receive buffer
pub const RX_BUFFER_SIZE: usize = 2048;
/// Size of the TCP socket transmit buffer
pub const TX_BUFFER_SIZE: usize = 2048;

/// Size of the MQTT client receive buffer for application data
pub const MQTT_RX_BUFFER_SIZE: usize = 512;
/// Size of the MQTT client transmit buffer for application data
pub const MQTT_TX_BUFFER_SIZE: usize = 512;

/// Longest topic name accepted on either side of the broker
pub const MAX_TOPIC_LEN: usize = 96;
/// Largest payload carried by a single publish or inbound control message
pub const MAX_PAYLOAD_LEN: usize = 128;
/// Inbound control messages buffered between two drains
pub const INBOUND_QUEUE_DEPTH: usize = 8;

/// Delay between two failed broker connection attempts
pub const CONNECT_RETRY_DELAY_MS: u32 = 5_000;
/// Failed connection attempts to one broker before the device restarts
pub const MAX_CONNECT_ATTEMPTS: u8 = 10;
/// Polling period while waiting for the network link to come up
pub const LINK_POLL_INTERVAL_MS: u32 = 500;

/// Time granted to the transport to flush both publishes before the aggregate is cleared
pub const PUBLISH_SETTLE_MS: u32 = 1_000;
/// Pause between two iterations of the continuous control loop
pub const LOOP_DELAY_MS: u32 = 50;
/// Pause after the radio is switched off, before entering deep sleep
pub const RADIO_OFF_SETTLE_MS: u32 = 50;

/// Message pump iterations granted to the admin session in a duty-cycled wake-up.
/// Bounded by the inbound queue so a full window never overflows it.
pub const ADMIN_PUMP_ITERATIONS: usize = INBOUND_QUEUE_DEPTH;
/// How long one pump iteration waits for an inbound message
pub const ADMIN_PUMP_WINDOW_MS: u64 = 100;

/// Longest wait for one Wi-Fi association attempt
pub const WIFI_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Inactivity timeout of a broker TCP socket
pub const SOCKET_TIMEOUT_SECS: u64 = 30;
/// Keep-alive announced to the brokers
pub const MQTT_KEEP_ALIVE_SECS: u16 = 60;
/// Properties slots of the MQTT client
pub const MQTT_MAX_PROPERTIES: usize = 5;

/// ADC reading of the supply divider at full scale (11 dB attenuation)
pub const SUPPLY_ADC_FULL_SCALE_MILLIVOLTS: u32 = 3_300;
/// The supply reaches the ADC pin through a 1:2 resistor divider
pub const SUPPLY_DIVIDER_RATIO: u32 = 2;

/// Prefix of the random MQTT client identifier
pub const CLIENT_ID_PREFIX: &str = "ESP32Client-";

/// Fixed topic receiving a copy of every telemetry payload on the admin broker
pub const ADMIN_OUTPUT_TOPIC: &str = "templogger/output";
/// Subscription filter covering the control topic and all of its children
pub const ADMIN_SUBSCRIBE_FILTER: &str = "templogger/admin/#";
/// Control leaf changing the batch size
pub const ADMIN_BATCH_SIZE_TOPIC: &str = "templogger/admin/num";
/// Control leaf changing the sample interval
pub const ADMIN_INTERVAL_TOPIC: &str = "templogger/admin/int";

/// Magic word at the head of the continuation record ("TLG1")
pub const RECORD_MAGIC: u32 = 0x3147_4C54;
/// Layout version of the continuation record
pub const RECORD_VERSION: u8 = 1;
/// Size of the continuation record in the non-volatile store
pub const RECORD_LEN: usize = 36;
/// Offset of the continuation record in the non-volatile store
pub const RECORD_OFFSET: u32 = 0;
