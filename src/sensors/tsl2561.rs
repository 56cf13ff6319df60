//! TSL2561 light-to-digital converter, driven at 1x gain with the 13.7 ms
//! integration window.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::info;

use super::{Luminosity, SensorError};

/// Address with the ADDR pin left floating
pub const DEFAULT_ADDRESS: u8 = 0x39;

const COMMAND: u8 = 0x80;
const WORD: u8 = 0x20;

const REG_CONTROL: u8 = 0x00;
const REG_TIMING: u8 = 0x01;
const REG_ID: u8 = 0x0A;
const REG_DATA0: u8 = 0x0C;
const REG_DATA1: u8 = 0x0E;

const POWER_ON: u8 = 0x03;
const POWER_OFF: u8 = 0x00;
const GAIN_1X_INTEGRATION_13MS: u8 = 0x00;

/// Conversion time of the 13.7 ms window, rounded up
const INTEGRATION_WAIT_MS: u32 = 14;
/// Channel counts above which the 13.7 ms window is saturated
const CLIPPING_THRESHOLD: u16 = 4900;
/// Reported for a saturated reading
const SATURATED_LUX: u32 = 65536;

const LUX_SCALE: u32 = 14;
const RATIO_SCALE: u32 = 9;
const CH_SCALE: u32 = 10;
const CH_SCALE_13MS: u64 = 0x7517;

/// (ratio upper bound, B, M) for the T, FN and CL packages
const COEFFICIENTS: [(u64, u64, u64); 7] = [
    (0x0040, 0x01f2, 0x01be),
    (0x0080, 0x0214, 0x02d1),
    (0x00c0, 0x023f, 0x037b),
    (0x0100, 0x0270, 0x03fe),
    (0x0138, 0x016f, 0x01fc),
    (0x019a, 0x00d2, 0x00fb),
    (0x029a, 0x0018, 0x0012),
];

/// Empirical lux approximation from the broadband and infrared channels.
pub fn calculate_lux(full_spectrum: u16, infrared: u16) -> u32 {
    if full_spectrum > CLIPPING_THRESHOLD || infrared > CLIPPING_THRESHOLD {
        return SATURATED_LUX;
    }

    // 1x gain is scaled up to the 16x reference
    let ch_scale = CH_SCALE_13MS << 4;
    let channel0 = (u64::from(full_spectrum) * ch_scale) >> CH_SCALE;
    let channel1 = (u64::from(infrared) * ch_scale) >> CH_SCALE;

    let ratio = if channel0 == 0 {
        0
    } else {
        (((channel1 << (RATIO_SCALE + 1)) / channel0) + 1) >> 1
    };

    let (b, m) = COEFFICIENTS
        .iter()
        .find(|(bound, _, _)| ratio <= *bound)
        .map_or((0, 0), |&(_, b, m)| (b, m));

    let weighted = (channel0 * b).saturating_sub(channel1 * m);
    ((weighted + (1 << (LUX_SCALE - 1))) >> LUX_SCALE) as u32
}

pub struct Tsl2561<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> Tsl2561<I2C, D> {
    /// Checks the part answers and configures gain and timing. The device is
    /// left powered down between measurements.
    pub async fn new(i2c: I2C, delay: D, address: u8) -> Result<Self, SensorError> {
        info!("Initialising TSL2561...");
        let mut sensor = Self {
            i2c,
            delay,
            address,
        };

        let mut id = [0u8; 1];
        sensor
            .i2c
            .write_read(address, &[COMMAND | REG_ID], &mut id)
            .await
            .map_err(|_| SensorError::InitFailure)?;
        // upper nibble is the part number: 0 for TSL2560, 1 for TSL2561
        if id[0] >> 4 > 1 {
            return Err(SensorError::InitFailure);
        }

        sensor
            .write_register(REG_CONTROL, POWER_ON)
            .await
            .map_err(|_| SensorError::InitFailure)?;
        sensor
            .write_register(REG_TIMING, GAIN_1X_INTEGRATION_13MS)
            .await
            .map_err(|_| SensorError::InitFailure)?;
        sensor
            .write_register(REG_CONTROL, POWER_OFF)
            .await
            .map_err(|_| SensorError::InitFailure)?;

        info!("Initialised TSL2561");
        Ok(sensor)
    }

    /// Powers up, waits one integration window, reads both channels and
    /// powers down again.
    pub async fn measure(&mut self) -> Result<Luminosity, SensorError> {
        self.write_register(REG_CONTROL, POWER_ON).await?;
        self.delay.delay_ms(INTEGRATION_WAIT_MS).await;

        let channels = self.read_channels().await;
        let power_off = self.write_register(REG_CONTROL, POWER_OFF).await;
        let (full_spectrum, infrared) = channels?;
        power_off?;

        Ok(Luminosity {
            infrared,
            full_spectrum,
            lux: calculate_lux(full_spectrum, infrared),
        })
    }

    async fn read_channels(&mut self) -> Result<(u16, u16), SensorError> {
        let full_spectrum = self.read_word(REG_DATA0).await?;
        let infrared = self.read_word(REG_DATA1).await?;
        Ok((full_spectrum, infrared))
    }

    async fn read_word(&mut self, register: u8) -> Result<u16, SensorError> {
        let mut bytes = [0u8; 2];
        self.i2c
            .write_read(self.address, &[COMMAND | WORD | register], &mut bytes)
            .await
            .map_err(|_| SensorError::MeasurementFailure)?;
        Ok(u16::from_le_bytes(bytes))
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[COMMAND | register, value])
            .await
            .map_err(|_| SensorError::MeasurementFailure)
    }
}
