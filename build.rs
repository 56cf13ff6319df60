use std::{env, error::Error, fs, path::Path};

use serde::Deserialize;

#[derive(Deserialize)]
struct RawBroker {
    hostname: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct RawConfig {
    device_id: String,
    wifi_ssid: String,
    wifi_psk: String,
    channel_id: String,
    api_key: String,
    sample_interval_seconds: u32,
    batch_size: u8,
    mode: String,
    telemetry: RawBroker,
    admin: RawBroker,
}

fn broker_literal(broker: &RawBroker) -> String {
    format!(
        "BrokerConfig {{ hostname: {host:?}, port: {port}, username: {user:?}, password: {pass:?} }}",
        host = broker.hostname,
        port = broker.port,
        user = broker.username,
        pass = broker.password,
    )
}

fn main() -> Result<(), Box<dyn Error>> {
    // Tell Cargo to rerun if toml changes
    println!("cargo:rerun-if-changed=cfg.toml");
    println!("cargo:rerun-if-changed=cfg.toml.example");

    // A checkout without a local cfg.toml still builds (and tests) against the example values
    let source = if Path::new("cfg.toml").exists() {
        "cfg.toml"
    } else {
        println!("cargo:warning=cfg.toml not found, using cfg.toml.example");
        "cfg.toml.example"
    };

    let toml_str = fs::read_to_string(source)?;
    let raw: RawConfig = toml::from_str(&toml_str)?;

    if raw.sample_interval_seconds == 0 {
        return Err("sample_interval_seconds must be at least 1".into());
    }
    if raw.batch_size == 0 {
        return Err("batch_size must be at least 1".into());
    }

    let mode = match raw.mode.as_str() {
        "continuous" => "OperatingMode::Continuous",
        "duty-cycled" => "OperatingMode::DutyCycled",
        other => return Err(format!("unknown mode {other:?}, expected continuous or duty-cycled").into()),
    };

    let code = format!(
        r#"
        pub const CONFIG: Config = Config {{
            device_id: {id:?},
            wifi_ssid: {ssid:?},
            wifi_psk: {psk:?},
            channel_id: {chan:?},
            api_key: {key:?},
            sample_interval_seconds: {intv},
            batch_size: {batch},
            mode: {mode},
            telemetry: {telemetry},
            admin: {admin},
        }};
    "#,
        id = raw.device_id,
        ssid = raw.wifi_ssid,
        psk = raw.wifi_psk,
        chan = raw.channel_id,
        key = raw.api_key,
        intv = raw.sample_interval_seconds,
        batch = raw.batch_size,
        mode = mode,
        telemetry = broker_literal(&raw.telemetry),
        admin = broker_literal(&raw.admin),
    );

    let out_dir = env::var("OUT_DIR")?;
    let dest_path = Path::new(&out_dir).join("config.rs");
    fs::write(dest_path, code)?;
    Ok(())
}
