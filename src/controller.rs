//! Top-level control loop: sampling, batch detection, connectivity, publishing
//! and, in duty-cycled builds, the deep-sleep hand-off.
//!
//! No state is persisted besides the continuation record. After a power
//! cycle the current state is derived from `sample_count` and `batch_size`.

use core::fmt::Debug;

use embedded_hal_async::delay::DelayNs;
use embedded_storage::Storage;
use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::aggregator::PersistentAggregator;
use crate::config::OperatingMode;
use crate::connectivity::{ConnectivityManager, EndpointId};
use crate::constants::{ADMIN_PUMP_ITERATIONS, INBOUND_QUEUE_DEPTH, LOOP_DELAY_MS, RADIO_OFF_SETTLE_MS};
use crate::power::{Clock, DeviceControl, DormancyPlan, RadioMode};
use crate::publisher::{PublishOutcome, TelemetryPublisher};
use crate::record::ContinuationRecord;
use crate::remote_config::RemoteConfigChannel;
use crate::sensors::{take_reading, Sensors};
use crate::transport::{Broker, InboundQueue, Network};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Sampling,
    Connecting,
    Publishing,
    /// Power-off boundary. Execution never continues in this state.
    Dormant,
}

impl CycleState {
    /// State an execution starts in, given the persisted record
    pub fn infer(record: &ContinuationRecord) -> Self {
        if record.sample_count >= record.batch_size {
            CycleState::Connecting
        } else {
            CycleState::Idle
        }
    }
}

/// Radio state for the next wake-up: on when that tick will complete the batch
pub fn dormancy_plan(record: &ContinuationRecord) -> DormancyPlan {
    let radio = if record.sample_count.saturating_add(1) >= record.batch_size {
        RadioMode::Enabled
    } else {
        RadioMode::Disabled
    };
    DormancyPlan {
        sleep_seconds: record.sample_interval_seconds,
        radio,
    }
}

/// The node: every component, owned in one place and driven from one task
pub struct DutyCycleController<S, Se, N, B, R, D, C, K> {
    mode: OperatingMode,
    state: CycleState,
    aggregator: PersistentAggregator<S>,
    sensors: Se,
    connectivity: ConnectivityManager<N, B, R, D, C>,
    publisher: TelemetryPublisher,
    inbound: InboundQueue,
    control: C,
    clock: K,
    last_sample_ms: u64,
}

impl<S, Se, N, B, R, D, C, K> DutyCycleController<S, Se, N, B, R, D, C, K>
where
    S: Storage,
    S::Error: Debug,
    Se: Sensors,
    N: Network,
    B: Broker,
    R: RngCore,
    D: DelayNs,
    C: DeviceControl,
    K: Clock,
{
    pub fn new(
        mode: OperatingMode,
        aggregator: PersistentAggregator<S>,
        sensors: Se,
        connectivity: ConnectivityManager<N, B, R, D, C>,
        publisher: TelemetryPublisher,
        control: C,
        clock: K,
    ) -> Self {
        let state = CycleState::infer(aggregator.record());
        let last_sample_ms = clock.now_ms();
        info!("Starting in {:?} mode, state {:?}", mode, state);
        Self {
            mode,
            state,
            aggregator,
            sensors,
            connectivity,
            publisher,
            inbound: InboundQueue::new(),
            control,
            clock,
            last_sample_ms,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn aggregator(&self) -> &PersistentAggregator<S> {
        &self.aggregator
    }

    pub fn connectivity(&self) -> &ConnectivityManager<N, B, R, D, C> {
        &self.connectivity
    }

    fn transition(&mut self, next: CycleState) {
        if self.state != next {
            debug!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Runs the node forever in the configured mode.
    pub async fn run(mut self) -> ! {
        match self.mode {
            OperatingMode::Continuous => loop {
                self.continuous_step().await;
            },
            OperatingMode::DutyCycled => {
                let plan = self.duty_cycle_tick().await;
                self.control.enter_dormancy(plan)
            }
        }
    }

    async fn sample(&mut self) {
        self.transition(CycleState::Sampling);
        let reading = take_reading(&mut self.sensors).await;
        self.aggregator.sample(&reading);
        self.last_sample_ms = self.clock.now_ms();
        info!(
            "Sample {}/{} taken",
            self.aggregator.record().sample_count,
            self.aggregator.record().batch_size
        );
    }

    /// Moves messages from the admin session into the inbound queue.
    ///
    /// With `stop_when_idle` the pump ends at the first empty poll, otherwise
    /// it spends all `iterations`.
    async fn pump_admin(&mut self, iterations: usize, stop_when_idle: bool) -> usize {
        let mut received = 0;
        for _ in 0..iterations {
            let admin = self.connectivity.broker_mut(EndpointId::Admin);
            if !admin.is_connected() {
                break;
            }
            match admin.poll().await {
                Some(message) => {
                    if self.inbound.push(message) {
                        received += 1;
                    }
                }
                None if stop_when_idle => break,
                None => {}
            }
        }
        received
    }

    fn apply_inbound(&mut self) {
        let applied = RemoteConfigChannel::drain(&mut self.inbound, &mut self.aggregator);
        if applied > 0 {
            info!("{} setting(s) changed by the admin channel", applied);
        }
    }

    /// Connecting and Publishing. Returns `None` when the brokers could not be
    /// reached, in which case the batch is kept for a later attempt.
    async fn publish_cycle(&mut self, pump_iterations: usize, stop_when_idle: bool) -> Option<PublishOutcome> {
        self.transition(CycleState::Connecting);
        if let Err(e) = self.connectivity.ensure_all_connected().await {
            error!("Cannot reach the brokers ({:?}), keeping the batch", e);
            return None;
        }

        self.pump_admin(pump_iterations, stop_when_idle).await;
        self.apply_inbound();

        self.transition(CycleState::Publishing);
        let (telemetry, admin, delay) = self.connectivity.parts_mut();
        let outcome = self
            .publisher
            .publish(&mut self.aggregator, telemetry, admin, delay)
            .await;
        Some(outcome)
    }

    /// One execution of a duty-cycled node: sample, publish when the batch is
    /// complete, power the radio down and checkpoint the record.
    ///
    /// Returns the plan to hand to the power domain.
    pub async fn duty_cycle_tick(&mut self) -> DormancyPlan {
        if self.state == CycleState::Idle {
            self.sample().await;
        } else {
            info!("Batch already complete at resume, publishing before sampling");
        }

        if self.aggregator.is_batch_ready() {
            if let Some(outcome) = self.publish_cycle(ADMIN_PUMP_ITERATIONS, false).await {
                debug!("Publish outcome {:?}", outcome);
            }
        }

        self.connectivity.shut_down().await;
        self.connectivity.delay_mut().delay_ms(RADIO_OFF_SETTLE_MS).await;

        if let Err(e) = self.aggregator.save() {
            error!("Failed to checkpoint before dormancy: {:?}", e);
        }

        let plan = dormancy_plan(self.aggregator.record());
        self.transition(CycleState::Dormant);
        info!(
            "Sleeping {}s, radio {:?} on wake-up",
            plan.sleep_seconds, plan.radio
        );
        plan
    }

    /// One iteration of the continuous loop.
    pub async fn continuous_step(&mut self) {
        // keep both sessions alive so control messages are delivered between samples
        match self.connectivity.ensure_all_connected().await {
            Ok(()) => {
                self.connectivity.keep_alive().await;
                self.pump_admin(INBOUND_QUEUE_DEPTH, true).await;
                self.apply_inbound();
            }
            Err(e) => warn!("Brokers unreachable: {:?}", e),
        }

        let interval_ms = u64::from(self.aggregator.record().sample_interval_seconds) * 1000;
        let elapsed_ms = self.clock.now_ms().saturating_sub(self.last_sample_ms);

        // a complete batch waits for its publish, it never takes extra samples
        let pending = self.aggregator.is_batch_ready();
        if self.state == CycleState::Idle && !pending && elapsed_ms >= interval_ms {
            self.sample().await;
        }

        if self.aggregator.is_batch_ready()
            && self.publish_cycle(INBOUND_QUEUE_DEPTH, true).await.is_none()
        {
            self.connectivity.delay_mut().delay_ms(LOOP_DELAY_MS).await;
            return;
        }

        self.transition(CycleState::Idle);
        self.connectivity.delay_mut().delay_ms(LOOP_DELAY_MS).await;
    }
}
