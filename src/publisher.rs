use core::fmt::Write;

use embedded_hal_async::delay::DelayNs;
use embedded_storage::Storage;
use heapless::String;
use log::{debug, info, warn};

use crate::aggregator::PersistentAggregator;
use crate::constants::{ADMIN_OUTPUT_TOPIC, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN, PUBLISH_SETTLE_MS};
use crate::record::ContinuationRecord;
use crate::transport::Broker;

/// Which destinations accepted the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub telemetry: bool,
    pub admin: bool,
}

impl PublishOutcome {
    pub fn all_delivered(&self) -> bool {
        self.telemetry && self.admin
    }
}

/// Formats the aggregate as the ThingSpeak field string.
pub fn format_payload(record: &ContinuationRecord) -> Result<String<MAX_PAYLOAD_LEN>, core::fmt::Error> {
    let averages = &record.averages;
    let mut payload: String<MAX_PAYLOAD_LEN> = String::new();
    write!(
        payload,
        "field1={:.1}&field2={:.1}&field3={:.1}&field4={:.1}&field5={:.1}&field6={}",
        averages.temperature_c,
        averages.humidity_pct,
        averages.infrared,
        averages.full_spectrum,
        averages.lux,
        record.last_supply_voltage_millivolts
    )?;
    Ok(payload)
}

/// `channels/<channel id>/publish/<api key>`
pub fn telemetry_topic(channel_id: &str, api_key: &str) -> Result<String<MAX_TOPIC_LEN>, core::fmt::Error> {
    let mut topic: String<MAX_TOPIC_LEN> = String::new();
    write!(topic, "channels/{}/publish/{}", channel_id, api_key)?;
    Ok(topic)
}

/// Sends the aggregate to the cloud channel and the local output topic
pub struct TelemetryPublisher {
    telemetry_topic: String<MAX_TOPIC_LEN>,
}

impl TelemetryPublisher {
    pub fn new(channel_id: &str, api_key: &str) -> Result<Self, core::fmt::Error> {
        Ok(Self {
            telemetry_topic: telemetry_topic(channel_id, api_key)?,
        })
    }

    pub fn topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// Publishes the current aggregate to both destinations, waits for the
    /// transport to flush, then clears the batch.
    ///
    /// The batch is cleared whatever the outcome: a failed publish loses that
    /// batch.
    pub async fn publish<S, B, D>(
        &self,
        aggregator: &mut PersistentAggregator<S>,
        telemetry: &mut B,
        admin: &mut B,
        delay: &mut D,
    ) -> PublishOutcome
    where
        S: Storage,
        S::Error: core::fmt::Debug,
        B: Broker,
        D: DelayNs,
    {
        let outcome = match format_payload(aggregator.record()) {
            Ok(payload) => {
                debug!("Publishing {} to {}", payload, self.telemetry_topic);
                PublishOutcome {
                    telemetry: telemetry.publish(&self.telemetry_topic, payload.as_bytes()).await,
                    admin: admin.publish(ADMIN_OUTPUT_TOPIC, payload.as_bytes()).await,
                }
            }
            Err(_) => {
                warn!("Aggregate does not fit the payload buffer, nothing sent");
                PublishOutcome {
                    telemetry: false,
                    admin: false,
                }
            }
        };

        if outcome.all_delivered() {
            info!("Aggregate published to both destinations");
        } else {
            warn!(
                "Aggregate publish incomplete: telemetry {}, admin {}. Batch discarded",
                outcome.telemetry, outcome.admin
            );
        }

        delay.delay_ms(PUBLISH_SETTLE_MS).await;
        aggregator.reset();
        outcome
    }
}
