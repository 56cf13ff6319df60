//! Administrative control messages changing the sampling settings at runtime.
//!
//! Two leaves under the control topic are understood:
//! - `templogger/admin/num` sets the batch size (1..=255)
//! - `templogger/admin/int` sets the sample interval in seconds (>= 1)
//!
//! Payloads are ASCII decimal integers. Anything that does not parse to a
//! value in range is rejected and the current setting kept; no reply is sent.

use core::num::{NonZeroU32, NonZeroU8};

use embedded_storage::Storage;
use log::{debug, info, warn};

use crate::aggregator::PersistentAggregator;
use crate::constants::{ADMIN_BATCH_SIZE_TOPIC, ADMIN_INTERVAL_TOPIC};
use crate::transport::{InboundMessage, InboundQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    NotUtf8,
    NotANumber,
    Zero,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    BatchSize(NonZeroU8),
    SampleInterval(NonZeroU32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied(ConfigChange),
    Rejected(ControlError),
    Ignored,
}

/// Applies inbound admin messages to the aggregator's live, persisted settings
pub struct RemoteConfigChannel;

impl RemoteConfigChannel {
    pub fn on_message<S>(
        topic: &str,
        payload: &[u8],
        aggregator: &mut PersistentAggregator<S>,
    ) -> ControlOutcome
    where
        S: Storage,
        S::Error: core::fmt::Debug,
    {
        let change = match topic {
            ADMIN_BATCH_SIZE_TOPIC => parse_batch_size(payload).map(ConfigChange::BatchSize),
            ADMIN_INTERVAL_TOPIC => parse_interval(payload).map(ConfigChange::SampleInterval),
            _ => {
                debug!("Ignoring message on {}", topic);
                return ControlOutcome::Ignored;
            }
        };

        match change {
            Ok(change) => {
                info!("Message arrived [{}] applying {:?}", topic, change);
                match change {
                    ConfigChange::BatchSize(batch) => aggregator.apply_config(None, Some(batch)),
                    ConfigChange::SampleInterval(interval) => {
                        aggregator.apply_config(Some(interval), None)
                    }
                }
                ControlOutcome::Applied(change)
            }
            Err(e) => {
                warn!(
                    "Message arrived [{}] rejected ({:?}), payload {:?}",
                    topic,
                    e,
                    core::str::from_utf8(payload).unwrap_or("<binary>")
                );
                ControlOutcome::Rejected(e)
            }
        }
    }

    pub fn handle<S>(message: &InboundMessage, aggregator: &mut PersistentAggregator<S>) -> ControlOutcome
    where
        S: Storage,
        S::Error: core::fmt::Debug,
    {
        Self::on_message(&message.topic, &message.payload, aggregator)
    }

    /// Applies every queued message in arrival order. Returns how many changed a setting.
    pub fn drain<S>(queue: &mut InboundQueue, aggregator: &mut PersistentAggregator<S>) -> usize
    where
        S: Storage,
        S::Error: core::fmt::Debug,
    {
        let mut applied = 0;
        while let Some(message) = queue.pop() {
            if let ControlOutcome::Applied(_) = Self::handle(&message, aggregator) {
                applied += 1;
            }
        }
        applied
    }
}

fn parse_u32(payload: &[u8]) -> Result<u32, ControlError> {
    let text = core::str::from_utf8(payload).map_err(|_| ControlError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ControlError::NotANumber);
    }
    text.parse::<u32>().map_err(|_| ControlError::OutOfRange)
}

fn parse_batch_size(payload: &[u8]) -> Result<NonZeroU8, ControlError> {
    let value = parse_u32(payload)?;
    let value = u8::try_from(value).map_err(|_| ControlError::OutOfRange)?;
    NonZeroU8::new(value).ok_or(ControlError::Zero)
}

fn parse_interval(payload: &[u8]) -> Result<NonZeroU32, ControlError> {
    NonZeroU32::new(parse_u32(payload)?).ok_or(ControlError::Zero)
}
