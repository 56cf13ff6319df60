//! Continuation record: the state that survives a deep-sleep power cycle.
//!
//! Binary format (little-endian, 36 bytes at offset 0 of the store):
//! - magic: 4 bytes (u32)
//! - version: 1 byte
//! - batch_size: 1 byte
//! - sample_count: 1 byte
//! - reserved: 1 byte
//! - sample_interval_seconds: 4 bytes (u32)
//! - last_supply_voltage_millivolts: 2 bytes (u16)
//! - averages: 20 bytes (5 × f32: temperature, humidity, infrared, full spectrum, lux)
//! - checksum: 1 byte
//! - padding: 1 byte

use crate::config::RuntimeSettings;
use crate::constants::{RECORD_LEN, RECORD_MAGIC, RECORD_VERSION};

#[derive(Debug, PartialEq, Eq)]
pub enum RecordError {
    BadMagic,
    UnsupportedVersion(u8),
    ChecksumMismatch,
    ZeroBatchSize,
    ZeroInterval,
    NonFiniteAverage,
}

/// Partial means of the current batch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverages {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub infrared: f32,
    pub full_spectrum: f32,
    pub lux: f32,
}

impl RunningAverages {
    fn to_array(self) -> [f32; 5] {
        [
            self.temperature_c,
            self.humidity_pct,
            self.infrared,
            self.full_spectrum,
            self.lux,
        ]
    }

    fn from_array(values: [f32; 5]) -> Self {
        Self {
            temperature_c: values[0],
            humidity_pct: values[1],
            infrared: values[2],
            full_spectrum: values[3],
            lux: values[4],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuationRecord {
    pub sample_interval_seconds: u32,
    pub batch_size: u8,
    pub sample_count: u8,
    pub averages: RunningAverages,
    pub last_supply_voltage_millivolts: u16,
}

impl ContinuationRecord {
    /// Fresh record for a cold boot: the given settings and an empty batch.
    pub const fn new(settings: RuntimeSettings) -> Self {
        Self {
            sample_interval_seconds: settings.sample_interval_seconds,
            batch_size: settings.batch_size,
            sample_count: 0,
            averages: RunningAverages {
                temperature_c: 0.0,
                humidity_pct: 0.0,
                infrared: 0.0,
                full_spectrum: 0.0,
                lux: 0.0,
            },
            last_supply_voltage_millivolts: 0,
        }
    }

    pub const fn settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            sample_interval_seconds: self.sample_interval_seconds,
            batch_size: self.batch_size,
        }
    }

    /// Serializes the record into its persisted layout.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];

        bytes[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        bytes[4] = RECORD_VERSION;
        bytes[5] = self.batch_size;
        bytes[6] = self.sample_count;
        bytes[8..12].copy_from_slice(&self.sample_interval_seconds.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.last_supply_voltage_millivolts.to_le_bytes());

        for (i, value) in self.averages.to_array().iter().enumerate() {
            let offset = 14 + i * 4;
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        bytes[RECORD_LEN - 2] = checksum8(&bytes[..RECORD_LEN - 2]);
        bytes
    }

    /// Parses and validates a persisted record.
    ///
    /// A record whose sample count exceeds its batch size is accepted: a
    /// shrinking batch size applied mid-batch legitimately produces one, and
    /// the next readiness check publishes it.
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Result<Self, RecordError> {
        if u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) != RECORD_MAGIC {
            return Err(RecordError::BadMagic);
        }
        if bytes[4] != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(bytes[4]));
        }
        if bytes[RECORD_LEN - 2] != checksum8(&bytes[..RECORD_LEN - 2]) {
            return Err(RecordError::ChecksumMismatch);
        }

        let batch_size = bytes[5];
        if batch_size == 0 {
            return Err(RecordError::ZeroBatchSize);
        }
        let sample_interval_seconds = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if sample_interval_seconds == 0 {
            return Err(RecordError::ZeroInterval);
        }

        let mut values = [0f32; 5];
        for (i, value) in values.iter_mut().enumerate() {
            let offset = 14 + i * 4;
            let mut value_bytes = [0u8; 4];
            value_bytes.copy_from_slice(&bytes[offset..offset + 4]);
            *value = f32::from_le_bytes(value_bytes);
            if !value.is_finite() {
                return Err(RecordError::NonFiniteAverage);
            }
        }

        Ok(Self {
            sample_interval_seconds,
            batch_size,
            sample_count: bytes[6],
            averages: RunningAverages::from_array(values),
            last_supply_voltage_millivolts: u16::from_le_bytes([bytes[12], bytes[13]]),
        })
    }
}

fn checksum8(bytes: &[u8]) -> u8 {
    let mut acc = 0x5Au8;
    for &byte in bytes {
        acc ^= byte.rotate_left(1);
    }
    acc
}
