use bme280_rs::{AsyncBme280, Oversampling, SensorMode};
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Delay, Timer};
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::i2c::master::I2c;
use esp_hal::peripherals::{ADC1, GPIO34};
use esp_hal::{Async, Blocking};
use log::{info, warn};

use templogger::constants::{SUPPLY_ADC_FULL_SCALE_MILLIVOLTS, SUPPLY_DIVIDER_RATIO};
use templogger::sensors::tsl2561::Tsl2561;
use templogger::sensors::{Luminosity, SensorError, Sensors};

pub type SharedI2c = I2cDevice<'static, NoopRawMutex, I2c<'static, Async>>;

const ADC_MAX_READING: u32 = 4095;

pub struct Bme280<I2C> {
    sensor: AsyncBme280<I2C, Delay>,
}

impl<I2C: embedded_hal_async::i2c::I2c> Bme280<I2C> {
    pub async fn new(i2c: I2C) -> Result<Self, SensorError> {
        info!("Initialising BME280...");
        let mut sensor = AsyncBme280::new(i2c, Delay);
        sensor.init().await.map_err(|_| SensorError::InitFailure)?;

        sensor
            .set_sampling_configuration(
                bme280_rs::Configuration::default()
                    .with_temperature_oversampling(Oversampling::Oversample1)
                    .with_pressure_oversampling(Oversampling::Skip)
                    .with_humidity_oversampling(Oversampling::Oversample1)
                    .with_sensor_mode(SensorMode::Normal),
            )
            .await
            .map_err(|_| SensorError::InitFailure)?;

        info!("Initialised BME280");

        Ok(Self { sensor })
    }

    async fn temperature(&mut self) -> Option<f32> {
        self.sensor.read_sample().await.ok()?.temperature
    }

    async fn humidity(&mut self) -> Option<f32> {
        self.sensor.read_sample().await.ok()?.humidity
    }
}

/// Supply voltage through a resistor divider on GPIO34
pub struct SupplyMonitor {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<GPIO34<'static>, ADC1<'static>>,
}

impl SupplyMonitor {
    pub fn new(adc: Adc<'static, ADC1<'static>, Blocking>, pin: AdcPin<GPIO34<'static>, ADC1<'static>>) -> Self {
        Self { adc, pin }
    }

    async fn millivolts(&mut self) -> u16 {
        let raw = loop {
            match self.adc.read_oneshot(&mut self.pin) {
                Ok(raw) => break raw,
                Err(_) => Timer::after_micros(10).await,
            }
        };
        let millivolts =
            u32::from(raw) * SUPPLY_ADC_FULL_SCALE_MILLIVOLTS * SUPPLY_DIVIDER_RATIO / ADC_MAX_READING;
        u16::try_from(millivolts).unwrap_or(u16::MAX)
    }
}

/// The node's sensor set. A sensor that failed to initialise reads as failed
/// on every tick.
pub struct NodeSensors {
    climate: Option<Bme280<SharedI2c>>,
    light: Option<Tsl2561<SharedI2c, Delay>>,
    supply: SupplyMonitor,
}

impl NodeSensors {
    pub fn new(
        climate: Result<Bme280<SharedI2c>, SensorError>,
        light: Result<Tsl2561<SharedI2c, Delay>, SensorError>,
        supply: SupplyMonitor,
    ) -> Self {
        let climate = climate
            .inspect_err(|e| warn!("Climate sensor unavailable: {:?}", e))
            .ok();
        let light = light
            .inspect_err(|e| warn!("Light sensor unavailable: {:?}", e))
            .ok();
        Self {
            climate,
            light,
            supply,
        }
    }
}

impl Sensors for NodeSensors {
    async fn read_temperature_c(&mut self) -> f32 {
        match self.climate.as_mut() {
            Some(climate) => climate.temperature().await.unwrap_or(f32::NAN),
            None => f32::NAN,
        }
    }

    async fn read_humidity_pct(&mut self) -> f32 {
        match self.climate.as_mut() {
            Some(climate) => climate.humidity().await.unwrap_or(f32::NAN),
            None => f32::NAN,
        }
    }

    async fn read_luminosity(&mut self) -> Result<Luminosity, SensorError> {
        match self.light.as_mut() {
            Some(light) => light.measure().await,
            None => Err(SensorError::InitFailure),
        }
    }

    async fn read_supply_millivolts(&mut self) -> u16 {
        self.supply.millivolts().await
    }
}
