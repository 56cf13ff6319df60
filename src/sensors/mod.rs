#![allow(async_fn_in_trait)]

pub mod tsl2561;

use log::{info, warn};

#[derive(Debug)]
pub enum SensorError {
    InitFailure,
    MeasurementFailure,
}

/// One light measurement: raw channel counts plus the lux value derived from them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Luminosity {
    pub infrared: u16,
    pub full_spectrum: u16,
    pub lux: u32,
}

/// Readings of one sampling tick, already sanitized
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub infrared: u16,
    pub full_spectrum: u16,
    pub lux: u32,
    pub supply_voltage_millivolts: u16,
}

/// Sensor hardware of the node.
///
/// Climate reads return `NaN` when the sensor did not answer, mirroring the
/// drivers they wrap.
pub trait Sensors {
    async fn read_temperature_c(&mut self) -> f32;
    async fn read_humidity_pct(&mut self) -> f32;
    async fn read_luminosity(&mut self) -> Result<Luminosity, SensorError>;
    async fn read_supply_millivolts(&mut self) -> u16;
}

/// Reads every sensor once. Failed reads degrade to zero and are only logged.
pub async fn take_reading<S: Sensors>(sensors: &mut S) -> SensorReading {
    let humidity_pct = sanitize("humidity", sensors.read_humidity_pct().await);
    let temperature_c = sanitize("temperature", sensors.read_temperature_c().await);

    let luminosity = sensors.read_luminosity().await.unwrap_or_else(|e| {
        warn!("Failed to read light sensor: {:?}", e);
        Luminosity::default()
    });

    let supply_voltage_millivolts = sensors.read_supply_millivolts().await;

    let reading = SensorReading {
        temperature_c,
        humidity_pct,
        infrared: luminosity.infrared,
        full_spectrum: luminosity.full_spectrum,
        lux: luminosity.lux,
        supply_voltage_millivolts,
    };

    info!(
        "Humidity: {} %, Temperature: {} *C, IR: {}, Full: {}, Visible: {}, Lux: {}, Vdd: {} mV",
        reading.humidity_pct,
        reading.temperature_c,
        reading.infrared,
        reading.full_spectrum,
        reading.full_spectrum.saturating_sub(reading.infrared),
        reading.lux,
        reading.supply_voltage_millivolts
    );

    reading
}

fn sanitize(quantity: &str, value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!("Failed to read {} from climate sensor, using 0", quantity);
        0.0
    }
}
