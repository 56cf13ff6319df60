//! Network link and broker sessions with bounded retry.

use core::fmt::Write;

use embedded_hal_async::delay::DelayNs;
use heapless::String;
use log::{error, info, warn};
use rand_core::RngCore;

use crate::constants::{
    ADMIN_SUBSCRIBE_FILTER, CLIENT_ID_PREFIX, CONNECT_RETRY_DELAY_MS, LINK_POLL_INTERVAL_MS,
    MAX_CONNECT_ATTEMPTS,
};
use crate::power::DeviceControl;
use crate::transport::{Broker, Network, NetworkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointId {
    /// Cloud telemetry broker
    Telemetry,
    /// Local admin broker
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Link(NetworkError),
}

/// Keeps the network link and both broker sessions up.
///
/// Broker connection attempts are bounded: after [`MAX_CONNECT_ATTEMPTS`]
/// consecutive failures the device restarts and resumes from its
/// continuation record.
pub struct ConnectivityManager<N, B, R, D, C> {
    network: N,
    telemetry: B,
    admin: B,
    rng: R,
    delay: D,
    control: C,
}

impl<N, B, R, D, C> ConnectivityManager<N, B, R, D, C>
where
    N: Network,
    B: Broker,
    R: RngCore,
    D: DelayNs,
    C: DeviceControl,
{
    pub fn new(network: N, telemetry: B, admin: B, rng: R, delay: D, control: C) -> Self {
        Self {
            network,
            telemetry,
            admin,
            rng,
            delay,
            control,
        }
    }

    pub fn broker(&self, endpoint: EndpointId) -> &B {
        match endpoint {
            EndpointId::Telemetry => &self.telemetry,
            EndpointId::Admin => &self.admin,
        }
    }

    pub fn broker_mut(&mut self, endpoint: EndpointId) -> &mut B {
        match endpoint {
            EndpointId::Telemetry => &mut self.telemetry,
            EndpointId::Admin => &mut self.admin,
        }
    }

    pub fn is_connected(&self, endpoint: EndpointId) -> bool {
        self.broker(endpoint).is_connected()
    }

    /// Blocks until the link is up. Link failures are retried without bound.
    pub async fn ensure_link(&mut self) -> Result<(), ConnectError> {
        if self.network.is_up() {
            return Ok(());
        }

        info!("Bringing network link up...");
        loop {
            match self.network.bring_up().await {
                Ok(()) => break,
                Err(NetworkError::Misconfigured) => {
                    error!("Network link misconfigured, giving up on this cycle");
                    return Err(ConnectError::Link(NetworkError::Misconfigured));
                }
                Err(e) => {
                    warn!("Failed to bring network link up: {:?}. Retrying...", e);
                    self.delay.delay_ms(LINK_POLL_INTERVAL_MS).await;
                }
            }
        }

        while !self.network.is_up() {
            self.delay.delay_ms(LINK_POLL_INTERVAL_MS).await;
        }
        info!("Network link up");
        Ok(())
    }

    /// Connects `endpoint` unless it already is.
    ///
    /// Never returns after the attempt bound is exhausted: the device restarts.
    pub async fn ensure_connected(&mut self, endpoint: EndpointId) -> Result<(), ConnectError> {
        if self.is_connected(endpoint) {
            return Ok(());
        }

        self.ensure_link().await?;

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            let client_id = self.client_id();
            info!(
                "Attempting {:?} MQTT connection as {} ({}/{})...",
                endpoint, client_id, attempt, MAX_CONNECT_ATTEMPTS
            );

            match self.broker_mut(endpoint).connect(&client_id).await {
                Ok(()) => {
                    info!("{:?} broker connected", endpoint);
                    if endpoint == EndpointId::Admin {
                        self.subscribe_admin().await;
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!("{:?} broker connection failed: {:?}", endpoint, e);
                    if attempt < MAX_CONNECT_ATTEMPTS {
                        info!("Trying again in {} ms", CONNECT_RETRY_DELAY_MS);
                        self.delay.delay_ms(CONNECT_RETRY_DELAY_MS).await;
                    }
                }
            }
        }

        error!(
            "{:?} broker unreachable after {} attempts, restarting",
            endpoint, MAX_CONNECT_ATTEMPTS
        );
        self.control.restart()
    }

    /// Connects the telemetry broker, then the admin broker.
    pub async fn ensure_all_connected(&mut self) -> Result<(), ConnectError> {
        self.ensure_connected(EndpointId::Telemetry).await?;
        self.ensure_connected(EndpointId::Admin).await
    }

    /// Closes both sessions and powers the link down.
    pub async fn shut_down(&mut self) {
        if self.telemetry.is_connected() {
            self.telemetry.disconnect().await;
        }
        if self.admin.is_connected() {
            self.admin.disconnect().await;
        }
        self.network.shut_down().await;
    }

    /// Keeps idle sessions open between publishes. A session found dead is
    /// reopened by the next [`Self::ensure_all_connected`].
    pub async fn keep_alive(&mut self) {
        for endpoint in [EndpointId::Telemetry, EndpointId::Admin] {
            let broker = self.broker_mut(endpoint);
            if broker.is_connected() && !broker.keep_alive().await {
                warn!("{:?} session lost", endpoint);
            }
        }
    }

    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    /// Both sessions and the delay, borrowed together for a publish.
    pub fn parts_mut(&mut self) -> (&mut B, &mut B, &mut D) {
        (&mut self.telemetry, &mut self.admin, &mut self.delay)
    }

    async fn subscribe_admin(&mut self) {
        if self.admin.subscribe(ADMIN_SUBSCRIBE_FILTER).await {
            info!("Subscribed to {}", ADMIN_SUBSCRIBE_FILTER);
        } else {
            warn!("Failed to subscribe to {}", ADMIN_SUBSCRIBE_FILTER);
        }
    }

    fn client_id(&mut self) -> String<24> {
        let mut id = String::new();
        // prefix plus at most four hex digits always fits
        let _ = write!(id, "{}{:x}", CLIENT_ID_PREFIX, self.rng.next_u32() & 0xffff);
        id
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;
    use crate::testing::{FakeBroker, FakeControl, FakeDelay, FakeNetwork, Probe, StepRng};
    use embassy_futures::block_on;

    type Manager = ConnectivityManager<FakeNetwork, FakeBroker, StepRng, FakeDelay, FakeControl>;

    fn manager(probe: &Probe) -> Manager {
        ConnectivityManager::new(
            FakeNetwork::new(probe),
            FakeBroker::new(probe, EndpointId::Telemetry),
            FakeBroker::new(probe, EndpointId::Admin),
            StepRng::default(),
            FakeDelay::new(probe),
            FakeControl::new(probe),
        )
    }

    #[test]
    fn already_connected_endpoint_is_left_alone() {
        let probe = Probe::default();
        let mut manager = manager(&probe);
        block_on(manager.ensure_connected(EndpointId::Telemetry)).unwrap();
        let attempts = probe.connect_attempts(EndpointId::Telemetry);

        block_on(manager.ensure_connected(EndpointId::Telemetry)).unwrap();
        assert_eq!(probe.connect_attempts(EndpointId::Telemetry), attempts);
        assert_eq!(probe.link_bring_ups(), 1);
    }

    #[test]
    fn link_comes_up_before_the_broker_connects() {
        let probe = Probe::default();
        probe.set_link_polls_until_up(3);
        let mut manager = manager(&probe);

        block_on(manager.ensure_connected(EndpointId::Telemetry)).unwrap();
        assert!(probe.link_is_up());
        assert_eq!(probe.connect_attempts(EndpointId::Telemetry), 1);
        assert_eq!(probe.total_delay_ms(), 3 * u64::from(LINK_POLL_INTERVAL_MS));
    }

    #[test]
    fn link_failures_are_retried_until_the_link_comes_up() {
        let probe = Probe::default();
        probe.set_bring_up_failures(4);
        let mut manager = manager(&probe);

        block_on(manager.ensure_link()).unwrap();
        assert_eq!(probe.link_bring_ups(), 5);
    }

    #[test]
    fn misconfigured_link_is_reported() {
        let probe = Probe::default();
        probe.set_link_misconfigured();
        let mut manager = manager(&probe);

        assert_eq!(
            block_on(manager.ensure_connected(EndpointId::Admin)),
            Err(ConnectError::Link(NetworkError::Misconfigured))
        );
        assert_eq!(probe.connect_attempts(EndpointId::Admin), 0);
    }

    #[test]
    fn transient_failures_back_off_five_seconds_each() {
        let probe = Probe::default();
        probe.fail_connects(EndpointId::Telemetry, 3);
        let mut manager = manager(&probe);

        block_on(manager.ensure_connected(EndpointId::Telemetry)).unwrap();
        assert_eq!(probe.connect_attempts(EndpointId::Telemetry), 4);
        assert_eq!(probe.total_delay_ms(), 3 * u64::from(CONNECT_RETRY_DELAY_MS));
        assert_eq!(probe.restarts(), 0);
    }

    #[test]
    fn each_attempt_uses_a_fresh_client_id() {
        let probe = Probe::default();
        probe.fail_connects(EndpointId::Telemetry, 2);
        let mut manager = manager(&probe);

        block_on(manager.ensure_connected(EndpointId::Telemetry)).unwrap();
        let ids = probe.client_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id.starts_with(CLIENT_ID_PREFIX)));
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }

    #[test]
    fn exhausted_retries_restart_instead_of_an_eleventh_attempt() {
        let probe = Probe::default();
        probe.fail_connects(EndpointId::Telemetry, u32::MAX);
        let mut manager = manager(&probe);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            block_on(manager.ensure_connected(EndpointId::Telemetry))
        }));

        assert!(outcome.is_err(), "ensure_connected returned instead of restarting");
        assert_eq!(probe.connect_attempts(EndpointId::Telemetry), 10);
        assert_eq!(probe.restarts(), 1);
        assert_eq!(probe.total_delay_ms(), 9 * u64::from(CONNECT_RETRY_DELAY_MS));
    }

    #[test]
    fn retry_budget_is_per_endpoint() {
        let probe = Probe::default();
        probe.fail_connects(EndpointId::Telemetry, 9);
        probe.fail_connects(EndpointId::Admin, 9);
        let mut manager = manager(&probe);

        block_on(manager.ensure_all_connected()).unwrap();
        assert_eq!(probe.connect_attempts(EndpointId::Telemetry), 10);
        assert_eq!(probe.connect_attempts(EndpointId::Admin), 10);
        assert_eq!(probe.restarts(), 0);
    }

    #[test]
    fn admin_connection_subscribes_to_the_control_tree() {
        let probe = Probe::default();
        let mut manager = manager(&probe);

        block_on(manager.ensure_all_connected()).unwrap();
        assert_eq!(probe.subscriptions(), vec![ADMIN_SUBSCRIBE_FILTER.to_string()]);
    }

    #[test]
    fn subscription_failure_is_not_retried() {
        let probe = Probe::default();
        probe.set_subscribe_fails();
        let mut manager = manager(&probe);

        block_on(manager.ensure_connected(EndpointId::Admin)).unwrap();
        assert!(manager.is_connected(EndpointId::Admin));
        assert_eq!(probe.subscribe_calls(), 1);
    }

    #[test]
    fn shut_down_disconnects_everything() {
        let probe = Probe::default();
        let mut manager = manager(&probe);
        block_on(manager.ensure_all_connected()).unwrap();

        block_on(manager.shut_down());
        assert!(!manager.is_connected(EndpointId::Telemetry));
        assert!(!manager.is_connected(EndpointId::Admin));
        assert!(!probe.link_is_up());
    }

    #[test]
    fn keep_alive_holds_sessions_open_and_notices_dead_ones() {
        let probe = Probe::default();
        let mut manager = manager(&probe);
        block_on(manager.ensure_all_connected()).unwrap();

        for _ in 0..10 {
            probe.advance_ms(30_000);
            block_on(manager.keep_alive());
        }
        assert!(manager.is_connected(EndpointId::Telemetry));
        assert_eq!(probe.session_drops(EndpointId::Telemetry), 0);

        probe.advance_ms(120_000);
        block_on(manager.keep_alive());
        assert!(!manager.is_connected(EndpointId::Telemetry));
        assert!(!manager.is_connected(EndpointId::Admin));

        block_on(manager.ensure_all_connected()).unwrap();
        assert_eq!(probe.connect_attempts(EndpointId::Telemetry), 2);
        assert_eq!(probe.subscribe_calls(), 2);
    }
}
