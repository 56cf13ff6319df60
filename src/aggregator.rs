//! Running averages of the current batch, persisted after every mutation.

use core::fmt::Debug;
use core::num::{NonZeroU32, NonZeroU8};

use embedded_storage::Storage;
use log::{debug, error, info, warn};

use crate::config::RuntimeSettings;
use crate::constants::{RECORD_LEN, RECORD_OFFSET};
use crate::power::BootKind;
use crate::record::{ContinuationRecord, RecordError, RunningAverages};
use crate::sensors::SensorReading;

#[derive(Debug)]
pub enum LoadError<E> {
    Storage(E),
    Record(RecordError),
}

/// Owner of the continuation record.
///
/// Every mutator writes the whole record back to the store before returning,
/// so a restart at any point resumes from the last completed mutation.
pub struct PersistentAggregator<S> {
    record: ContinuationRecord,
    store: S,
}

impl<S> PersistentAggregator<S>
where
    S: Storage,
    S::Error: Debug,
{
    /// Starts from a fresh record carrying `defaults` and persists it.
    pub fn cold_boot(store: S, defaults: RuntimeSettings) -> Self {
        let mut aggregator = Self {
            record: ContinuationRecord::new(defaults),
            store,
        };
        aggregator.commit();
        info!(
            "Cold boot: interval {}s, batch size {}",
            defaults.sample_interval_seconds, defaults.batch_size
        );
        aggregator
    }

    /// Reloads the record left behind before dormancy. An unreadable or
    /// invalid record degrades to a cold boot.
    pub fn resume(mut store: S, defaults: RuntimeSettings) -> Self {
        match Self::load(&mut store) {
            Ok(record) => {
                info!(
                    "Resumed at sample {}/{} (interval {}s)",
                    record.sample_count, record.batch_size, record.sample_interval_seconds
                );
                Self { record, store }
            }
            Err(e) => {
                warn!("Continuation record unusable ({:?}), starting over", e);
                Self::cold_boot(store, defaults)
            }
        }
    }

    pub fn boot(kind: BootKind, store: S, defaults: RuntimeSettings) -> Self {
        match kind {
            BootKind::Cold => Self::cold_boot(store, defaults),
            BootKind::Resume => Self::resume(store, defaults),
        }
    }

    pub fn load(store: &mut S) -> Result<ContinuationRecord, LoadError<S::Error>> {
        let mut bytes = [0u8; RECORD_LEN];
        store
            .read(RECORD_OFFSET, &mut bytes)
            .map_err(LoadError::Storage)?;
        ContinuationRecord::from_bytes(&bytes).map_err(LoadError::Record)
    }

    /// Writes the record to the store, reporting failures to the caller.
    pub fn save(&mut self) -> Result<(), S::Error> {
        self.store.write(RECORD_OFFSET, &self.record.to_bytes())
    }

    fn commit(&mut self) {
        if let Err(e) = self.save() {
            error!("Failed to persist continuation record: {:?}", e);
        }
    }

    pub fn record(&self) -> &ContinuationRecord {
        &self.record
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Folds one reading into the partial means.
    ///
    /// The divisor is the batch size at the time of the call, so a batch size
    /// changed mid-batch leaves the earlier contributions scaled by the old
    /// divisor. They are deliberately not renormalized.
    pub fn sample(&mut self, reading: &SensorReading) {
        let divisor = f32::from(self.record.batch_size.max(1));
        let averages = &mut self.record.averages;

        averages.temperature_c += reading.temperature_c / divisor;
        averages.humidity_pct += reading.humidity_pct / divisor;
        averages.infrared += f32::from(reading.infrared) / divisor;
        averages.full_spectrum += f32::from(reading.full_spectrum) / divisor;
        averages.lux += reading.lux as f32 / divisor;

        self.record.last_supply_voltage_millivolts = reading.supply_voltage_millivolts;
        self.record.sample_count = self.record.sample_count.saturating_add(1);

        debug!(
            "Partial means after {}/{}: {:?}, vdd {} mV",
            self.record.sample_count,
            self.record.batch_size,
            self.record.averages,
            self.record.last_supply_voltage_millivolts
        );

        self.commit();
    }

    pub fn is_batch_ready(&self) -> bool {
        self.record.sample_count >= self.record.batch_size
    }

    /// Clears the batch. Sampling interval and batch size are kept.
    pub fn reset(&mut self) {
        self.record.sample_count = 0;
        self.record.averages = RunningAverages::default();
        self.record.last_supply_voltage_millivolts = 0;
        self.commit();
    }

    /// Overwrites the given settings in place, effective for the batch in progress.
    pub fn apply_config(&mut self, interval: Option<NonZeroU32>, batch: Option<NonZeroU8>) {
        if let Some(interval) = interval {
            info!(
                "Sample interval {}s -> {}s",
                self.record.sample_interval_seconds, interval
            );
            self.record.sample_interval_seconds = interval.get();
        }
        if let Some(batch) = batch {
            if self.record.sample_count > 0 {
                warn!(
                    "Batch size changed from {} to {} with {} samples already averaged",
                    self.record.batch_size, batch, self.record.sample_count
                );
            } else {
                info!("Batch size {} -> {}", self.record.batch_size, batch);
            }
            self.record.batch_size = batch.get();
        }
        self.commit();
    }
}
