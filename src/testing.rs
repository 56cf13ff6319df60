//! Host-side doubles for the hardware and network seams.
//!
//! Every double built from the same [`Probe`] records into it, so a test can
//! hand the doubles to the code under test and still inspect what happened.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal_async::delay::DelayNs;
use embedded_storage::{ReadStorage, Storage};
use rand_core::RngCore;

use crate::connectivity::EndpointId;
use crate::constants::{MQTT_KEEP_ALIVE_SECS, RECORD_LEN};
use crate::power::{Clock, DeviceControl, DormancyPlan};
use crate::record::{ContinuationRecord, RecordError};
use crate::sensors::{Luminosity, SensorError, SensorReading, Sensors};
use crate::transport::{Broker, BrokerError, InboundMessage, Network, NetworkError};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn reading(
    temperature_c: f32,
    humidity_pct: f32,
    infrared: u16,
    full_spectrum: u16,
    lux: u32,
    supply_voltage_millivolts: u16,
) -> SensorReading {
    SensorReading {
        temperature_c,
        humidity_pct,
        infrared,
        full_spectrum,
        lux,
        supply_voltage_millivolts,
    }
}

#[derive(Debug)]
pub enum MemoryStoreError {
    OutOfBounds,
    WriteRefused,
}

/// RAM-backed stand-in for the retained memory region
#[derive(Clone)]
pub struct MemoryStore {
    bytes: [u8; 64],
    writes: usize,
    pub fail_writes: bool,
}

impl MemoryStore {
    /// Zero-filled, like retained RAM after a power-on.
    pub fn new() -> Self {
        Self::filled(0)
    }

    /// Filled with 0xFF, like erased flash.
    pub fn erased() -> Self {
        Self::filled(0xFF)
    }

    fn filled(value: u8) -> Self {
        Self {
            bytes: [value; 64],
            writes: 0,
            fail_writes: false,
        }
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Decodes whatever is currently stored at the record offset.
    pub fn record(&self) -> Result<ContinuationRecord, RecordError> {
        let mut bytes = [0u8; RECORD_LEN];
        bytes.copy_from_slice(&self.bytes[..RECORD_LEN]);
        ContinuationRecord::from_bytes(&bytes)
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, MemoryStoreError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(MemoryStoreError::OutOfBounds)?;
        if end > self.bytes.len() {
            return Err(MemoryStoreError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl ReadStorage for MemoryStore {
    type Error = MemoryStoreError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for MemoryStore {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemoryStoreError::WriteRefused);
        }
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct ProbeState {
    link_up: bool,
    link_polls_until_up: u32,
    link_misconfigured: bool,
    bring_up_failures: u32,
    link_bring_ups: u32,

    connect_failures: [u32; 2],
    connect_attempts: [u32; 2],
    publish_results: [Option<bool>; 2],
    client_ids: Vec<String>,
    subscriptions: Vec<String>,
    subscribe_fails: bool,
    subscribe_calls: u32,
    published: Vec<(String, String)>,
    inbound: VecDeque<(String, Vec<u8>)>,

    elapsed_ns: u64,
    delayed_ns: u64,
    restarts: u32,
    dormancies: Vec<DormancyPlan>,
    sensor_reads: u32,
    session_drops: [u32; 2],
}

fn slot(endpoint: EndpointId) -> usize {
    match endpoint {
        EndpointId::Telemetry => 0,
        EndpointId::Admin => 1,
    }
}

/// Shared scenario state and recorder
#[derive(Clone)]
pub struct Probe(Rc<RefCell<ProbeState>>);

impl Default for Probe {
    fn default() -> Self {
        init_logger();
        Self(Rc::default())
    }
}

impl Probe {
    /// After a successful bring-up, `is_up` reports false this many more times.
    pub fn set_link_polls_until_up(&self, polls: u32) {
        self.0.borrow_mut().link_polls_until_up = polls;
    }

    pub fn set_link_misconfigured(&self) {
        self.0.borrow_mut().link_misconfigured = true;
    }

    pub fn set_bring_up_failures(&self, failures: u32) {
        self.0.borrow_mut().bring_up_failures = failures;
    }

    pub fn link_is_up(&self) -> bool {
        self.0.borrow().link_up
    }

    pub fn link_bring_ups(&self) -> u32 {
        self.0.borrow().link_bring_ups
    }

    /// The next `failures` connection attempts to `endpoint` are refused.
    pub fn fail_connects(&self, endpoint: EndpointId, failures: u32) {
        self.0.borrow_mut().connect_failures[slot(endpoint)] = failures;
    }

    pub fn connect_attempts(&self, endpoint: EndpointId) -> u32 {
        self.0.borrow().connect_attempts[slot(endpoint)]
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.0.borrow().client_ids.clone()
    }

    pub fn set_publish_result(&self, endpoint: EndpointId, accepted: bool) {
        self.0.borrow_mut().publish_results[slot(endpoint)] = Some(accepted);
    }

    /// Accepted publishes as (topic, payload), in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.0.borrow().published.clone()
    }

    pub fn set_subscribe_fails(&self) {
        self.0.borrow_mut().subscribe_fails = true;
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.0.borrow().subscribe_calls
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.0.borrow().subscriptions.clone()
    }

    /// Makes a message available to the admin session's next poll.
    pub fn queue_inbound(&self, topic: &str, payload: &[u8]) {
        self.0
            .borrow_mut()
            .inbound
            .push_back((topic.to_string(), payload.to_vec()));
    }

    pub fn pending_inbound(&self) -> usize {
        self.0.borrow().inbound.len()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.0.borrow_mut().elapsed_ns += ms * 1_000_000;
    }

    pub fn total_delay_ms(&self) -> u64 {
        self.0.borrow().delayed_ns / 1_000_000
    }

    pub fn restarts(&self) -> u32 {
        self.0.borrow().restarts
    }

    pub fn dormancies(&self) -> Vec<DormancyPlan> {
        self.0.borrow().dormancies.clone()
    }

    /// Sessions the fake broker closed for missing keep-alives
    pub fn session_drops(&self, endpoint: EndpointId) -> u32 {
        self.0.borrow().session_drops[slot(endpoint)]
    }

    pub fn sensor_reads(&self) -> u32 {
        self.0.borrow().sensor_reads
    }
}

pub struct FakeNetwork {
    probe: Probe,
}

impl FakeNetwork {
    pub fn new(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
        }
    }
}

impl Network for FakeNetwork {
    fn is_up(&self) -> bool {
        let mut state = self.probe.0.borrow_mut();
        if !state.link_up {
            return false;
        }
        if state.link_polls_until_up > 0 {
            state.link_polls_until_up -= 1;
            return false;
        }
        true
    }

    async fn bring_up(&mut self) -> Result<(), NetworkError> {
        let mut state = self.probe.0.borrow_mut();
        state.link_bring_ups += 1;
        if state.link_misconfigured {
            return Err(NetworkError::Misconfigured);
        }
        if state.bring_up_failures > 0 {
            state.bring_up_failures -= 1;
            return Err(NetworkError::RadioFailure);
        }
        state.link_up = true;
        Ok(())
    }

    async fn shut_down(&mut self) {
        self.probe.0.borrow_mut().link_up = false;
    }
}

/// Brokers close a session silent for one and a half keep-alive intervals
const KEEP_ALIVE_GRACE_NS: u64 = MQTT_KEEP_ALIVE_SECS as u64 * 1_500_000_000;

/// Broker session whose server side expires like a real broker. The client
/// side flag is not updated until the next exchange notices the drop.
pub struct FakeBroker {
    probe: Probe,
    endpoint: EndpointId,
    connected: bool,
    last_activity_ns: u64,
}

impl FakeBroker {
    pub fn new(probe: &Probe, endpoint: EndpointId) -> Self {
        Self {
            probe: probe.clone(),
            endpoint,
            connected: false,
            last_activity_ns: 0,
        }
    }

    /// Records an exchange with the broker, false when the broker already
    /// dropped the session.
    fn exchange(&mut self) -> bool {
        let mut state = self.probe.0.borrow_mut();
        let now = state.elapsed_ns;
        if now.saturating_sub(self.last_activity_ns) > KEEP_ALIVE_GRACE_NS {
            self.connected = false;
            state.session_drops[slot(self.endpoint)] += 1;
            return false;
        }
        self.last_activity_ns = now;
        true
    }
}

impl Broker for FakeBroker {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, client_id: &str) -> Result<(), BrokerError> {
        let mut state = self.probe.0.borrow_mut();
        let slot = slot(self.endpoint);
        state.connect_attempts[slot] += 1;
        state.client_ids.push(client_id.to_string());
        if state.connect_failures[slot] > 0 {
            state.connect_failures[slot] -= 1;
            return Err(BrokerError::ConnectionRefused);
        }
        self.connected = true;
        self.last_activity_ns = state.elapsed_ns;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.connected || !self.exchange() {
            return false;
        }
        let mut state = self.probe.0.borrow_mut();
        let accepted = state.publish_results[slot(self.endpoint)].unwrap_or(true);
        if accepted {
            state
                .published
                .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
        }
        accepted
    }

    async fn subscribe(&mut self, topic_filter: &str) -> bool {
        let mut state = self.probe.0.borrow_mut();
        state.subscribe_calls += 1;
        if state.subscribe_fails {
            return false;
        }
        state.subscriptions.push(topic_filter.to_string());
        true
    }

    async fn poll(&mut self) -> Option<InboundMessage> {
        if !self.connected || !self.exchange() || self.endpoint != EndpointId::Admin {
            return None;
        }
        let (topic, payload) = self.probe.0.borrow_mut().inbound.pop_front()?;
        InboundMessage::new(&topic, &payload).ok()
    }

    async fn keep_alive(&mut self) -> bool {
        self.connected && self.exchange()
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        if self.endpoint == EndpointId::Admin {
            // undelivered messages do not survive the session
            self.probe.0.borrow_mut().inbound.clear();
        }
    }
}

/// Returns immediately but advances the shared clock by the requested time
pub struct FakeDelay {
    probe: Probe,
}

impl FakeDelay {
    pub fn new(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
        }
    }

    fn elapse(&mut self, ns: u64) {
        let mut state = self.probe.0.borrow_mut();
        state.elapsed_ns += ns;
        state.delayed_ns += ns;
    }
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.elapse(u64::from(ns));
    }

    async fn delay_us(&mut self, us: u32) {
        self.elapse(u64::from(us) * 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.elapse(u64::from(ms) * 1_000_000);
    }
}

pub struct FakeClock {
    probe: Probe,
}

impl FakeClock {
    pub fn new(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
        }
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.probe.0.borrow().elapsed_ns / 1_000_000
    }
}

/// Records the request, then unwinds in place of the device going away
pub struct FakeControl {
    probe: Probe,
}

impl FakeControl {
    pub fn new(probe: &Probe) -> Self {
        Self {
            probe: probe.clone(),
        }
    }
}

impl DeviceControl for FakeControl {
    fn restart(&mut self) -> ! {
        self.probe.0.borrow_mut().restarts += 1;
        panic!("device restart requested");
    }

    fn enter_dormancy(&mut self, plan: DormancyPlan) -> ! {
        self.probe.0.borrow_mut().dormancies.push(plan);
        panic!("device entered dormancy");
    }
}

/// Deterministic generator producing a different low half-word on every call
#[derive(Default)]
pub struct StepRng {
    state: u32,
}

impl RngCore for StepRng {
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x0001_2345);
        self.state
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

pub struct FakeSensors {
    temperature_c: f32,
    humidity_pct: f32,
    luminosity: Luminosity,
    supply_millivolts: u16,
    probe: Option<Probe>,
    pub light_fails: bool,
}

impl FakeSensors {
    pub fn constant(
        temperature_c: f32,
        humidity_pct: f32,
        infrared: u16,
        full_spectrum: u16,
        lux: u32,
        supply_millivolts: u16,
    ) -> Self {
        Self {
            temperature_c,
            humidity_pct,
            luminosity: Luminosity {
                infrared,
                full_spectrum,
                lux,
            },
            supply_millivolts,
            probe: None,
            light_fails: false,
        }
    }

    /// Counts complete readings in `probe`.
    pub fn counting(mut self, probe: &Probe) -> Self {
        self.probe = Some(probe.clone());
        self
    }
}

impl Sensors for FakeSensors {
    async fn read_temperature_c(&mut self) -> f32 {
        if let Some(probe) = &self.probe {
            probe.0.borrow_mut().sensor_reads += 1;
        }
        self.temperature_c
    }

    async fn read_humidity_pct(&mut self) -> f32 {
        self.humidity_pct
    }

    async fn read_luminosity(&mut self) -> Result<Luminosity, SensorError> {
        if self.light_fails {
            Err(SensorError::MeasurementFailure)
        } else {
            Ok(self.luminosity)
        }
    }

    async fn read_supply_millivolts(&mut self) -> u16 {
        self.supply_millivolts
    }
}
