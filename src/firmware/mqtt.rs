//! Broker sessions over rust-mqtt.
//!
//! A client borrows its socket and buffers, so each broker gets a long-lived
//! task owning them. [`MqttSession`] is the handle the control loop drives,
//! one command at a time, through a pair of channels.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_net::{dns::DnsQueryType, tcp::TcpSocket, Stack};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{with_timeout, Duration, Instant};
use heapless::{String, Vec};
use log::{debug, error, info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};
use static_cell::StaticCell;

use templogger::config::BrokerConfig;
use templogger::constants::{
    ADMIN_PUMP_WINDOW_MS, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN, MQTT_KEEP_ALIVE_SECS, MQTT_MAX_PROPERTIES,
    MQTT_RX_BUFFER_SIZE, MQTT_TX_BUFFER_SIZE, RX_BUFFER_SIZE, SOCKET_TIMEOUT_SECS, TX_BUFFER_SIZE,
};
use templogger::transport::{Broker, BrokerError, InboundMessage};

type ClientId = String<24>;

enum Command {
    Connect(ClientId),
    Publish {
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, MAX_PAYLOAD_LEN>,
    },
    Subscribe(String<MAX_TOPIC_LEN>),
    Poll,
    KeepAlive,
    Disconnect,
}

enum Reply {
    Connected(Result<(), BrokerError>),
    Done(bool),
    Message(Option<InboundMessage>),
}

/// Mailbox between a session handle and its task
pub struct SessionChannels {
    commands: Channel<CriticalSectionRawMutex, Command, 1>,
    replies: Channel<CriticalSectionRawMutex, Reply, 1>,
    connected: AtomicBool,
}

impl SessionChannels {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            replies: Channel::new(),
            connected: AtomicBool::new(false),
        }
    }
}

pub struct SessionBuffers {
    rx: [u8; RX_BUFFER_SIZE],
    tx: [u8; TX_BUFFER_SIZE],
    mqtt_rx: [u8; MQTT_RX_BUFFER_SIZE],
    mqtt_tx: [u8; MQTT_TX_BUFFER_SIZE],
}

impl SessionBuffers {
    pub const fn new() -> Self {
        Self {
            rx: [0; RX_BUFFER_SIZE],
            tx: [0; TX_BUFFER_SIZE],
            mqtt_rx: [0; MQTT_RX_BUFFER_SIZE],
            mqtt_tx: [0; MQTT_TX_BUFFER_SIZE],
        }
    }
}

pub static TELEMETRY_SESSION: SessionChannels = SessionChannels::new();
pub static ADMIN_SESSION: SessionChannels = SessionChannels::new();
pub static TELEMETRY_BUFFERS: StaticCell<SessionBuffers> = StaticCell::new();
pub static ADMIN_BUFFERS: StaticCell<SessionBuffers> = StaticCell::new();

/// Control-loop side of a broker session
pub struct MqttSession {
    name: &'static str,
    channels: &'static SessionChannels,
}

impl MqttSession {
    pub fn new(name: &'static str, channels: &'static SessionChannels) -> Self {
        Self { name, channels }
    }

    async fn request(&mut self, command: Command) -> Reply {
        self.channels.commands.send(command).await;
        self.channels.replies.receive().await
    }
}

impl Broker for MqttSession {
    fn is_connected(&self) -> bool {
        self.channels.connected.load(Ordering::Acquire)
    }

    async fn connect(&mut self, client_id: &str) -> Result<(), BrokerError> {
        let mut id = ClientId::new();
        id.push_str(client_id)
            .map_err(|_| BrokerError::ConnectionRefused)?;
        match self.request(Command::Connect(id)).await {
            Reply::Connected(result) => result,
            _ => Err(BrokerError::SessionClosed),
        }
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            warn!("{} session closed, not publishing on {}", self.name, topic);
            return false;
        }
        let Ok(message) = InboundMessage::new(topic, payload) else {
            warn!("Publish on {} does not fit the session buffers", topic);
            return false;
        };
        let command = Command::Publish {
            topic: message.topic,
            payload: message.payload,
        };
        matches!(self.request(command).await, Reply::Done(true))
    }

    async fn subscribe(&mut self, topic_filter: &str) -> bool {
        let mut filter = String::new();
        if filter.push_str(topic_filter).is_err() {
            return false;
        }
        matches!(self.request(Command::Subscribe(filter)).await, Reply::Done(true))
    }

    async fn poll(&mut self) -> Option<InboundMessage> {
        if !self.is_connected() {
            return None;
        }
        match self.request(Command::Poll).await {
            Reply::Message(message) => message,
            _ => None,
        }
    }

    async fn keep_alive(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        matches!(self.request(Command::KeepAlive).await, Reply::Done(true))
    }

    async fn disconnect(&mut self) {
        if self.is_connected() {
            self.request(Command::Disconnect).await;
        }
    }
}

/// Owns the socket and client of one broker for the lifetime of the firmware.
#[embassy_executor::task(pool_size = 2)]
pub async fn session_task(
    stack: Stack<'static>,
    broker: BrokerConfig,
    channels: &'static SessionChannels,
    buffers: &'static mut SessionBuffers,
) {
    loop {
        // no session: only a connect request is meaningful
        let client_id = match channels.commands.receive().await {
            Command::Connect(client_id) => client_id,
            Command::Poll => {
                channels.replies.send(Reply::Message(None)).await;
                continue;
            }
            _ => {
                channels.replies.send(Reply::Done(false)).await;
                continue;
            }
        };

        run_session(stack, &broker, &client_id, channels, buffers).await;
        channels.connected.store(false, Ordering::Release);
    }
}

async fn run_session(
    stack: Stack<'static>,
    broker: &BrokerConfig,
    client_id: &str,
    channels: &'static SessionChannels,
    buffers: &mut SessionBuffers,
) {
    let SessionBuffers {
        rx,
        tx,
        mqtt_rx,
        mqtt_tx,
    } = buffers;

    let mut socket = TcpSocket::new(stack, rx, tx);
    socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));

    if let Err(e) = open_socket(stack, &mut socket, broker).await {
        channels.replies.send(Reply::Connected(Err(e))).await;
        return;
    }

    let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
    config.add_client_id(client_id);
    config.add_max_subscribe_qos(QualityOfService::QoS0);
    config.keep_alive = MQTT_KEEP_ALIVE_SECS;
    if let Some(username) = broker.username {
        config.add_username(username);
    }
    if let Some(password) = broker.password {
        config.add_password(password);
    }

    let mqtt_rx_len = mqtt_rx.len();
    let mqtt_tx_len = mqtt_tx.len();
    let mut client = MqttClient::<_, MQTT_MAX_PROPERTIES, _>::new(
        socket,
        mqtt_tx,
        mqtt_tx_len,
        mqtt_rx,
        mqtt_rx_len,
        config,
    );

    if let Err(e) = client.connect_to_broker().await {
        error!("MQTT connect_to_broker failed: {:?}", e);
        channels
            .replies
            .send(Reply::Connected(Err(BrokerError::ConnectionRefused)))
            .await;
        return;
    }

    info!("MQTT connected to {}:{}", broker.hostname, broker.port);
    channels.connected.store(true, Ordering::Release);
    channels.replies.send(Reply::Connected(Ok(()))).await;

    let ping_every = Duration::from_secs(u64::from(MQTT_KEEP_ALIVE_SECS) / 2);
    let mut last_activity = Instant::now();

    loop {
        match channels.commands.receive().await {
            Command::Connect(_) => {
                channels.replies.send(Reply::Connected(Ok(()))).await;
            }
            Command::Publish { topic, payload } => {
                let result = client
                    .send_message(&topic, &payload, QualityOfService::QoS0, false)
                    .await;
                last_activity = Instant::now();
                let delivered = match result {
                    Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => true,
                    Err(e) => {
                        error!("Failed to publish on {}: {:?}", topic, e);
                        false
                    }
                };
                channels.replies.send(Reply::Done(delivered)).await;
                if is_fatal(&result) {
                    return;
                }
            }
            Command::Subscribe(filter) => {
                let result = client.subscribe_to_topic(&filter).await;
                last_activity = Instant::now();
                if let Err(e) = &result {
                    warn!("Subscribe to {} failed: {:?}", filter, e);
                }
                channels.replies.send(Reply::Done(result.is_ok())).await;
                if is_fatal(&result) {
                    return;
                }
            }
            Command::KeepAlive => {
                if last_activity.elapsed() >= ping_every {
                    if let Err(e) = client.send_ping().await {
                        warn!("Keep-alive ping to {} failed: {:?}", broker.hostname, e);
                        channels.connected.store(false, Ordering::Release);
                        channels.replies.send(Reply::Done(false)).await;
                        return;
                    }
                    last_activity = Instant::now();
                }
                channels.replies.send(Reply::Done(true)).await;
            }
            Command::Poll => {
                if last_activity.elapsed() >= ping_every {
                    if let Err(e) = client.send_ping().await {
                        warn!("Keep-alive ping to {} failed: {:?}", broker.hostname, e);
                        channels.connected.store(false, Ordering::Release);
                        channels.replies.send(Reply::Message(None)).await;
                        return;
                    }
                    last_activity = Instant::now();
                }

                let received = with_timeout(
                    Duration::from_millis(ADMIN_PUMP_WINDOW_MS),
                    client.receive_message(),
                )
                .await;
                match received {
                    Ok(Ok((topic, payload))) => {
                        last_activity = Instant::now();
                        debug!("Message arrived [{}] {} bytes", topic, payload.len());
                        let message = InboundMessage::new(topic, payload).ok();
                        channels.replies.send(Reply::Message(message)).await;
                    }
                    Ok(Err(e)) => {
                        warn!("Session receive failed: {:?}", e);
                        channels.replies.send(Reply::Message(None)).await;
                        return;
                    }
                    Err(_) => channels.replies.send(Reply::Message(None)).await,
                }
            }
            Command::Disconnect => {
                let _ = client.disconnect().await;
                info!("MQTT disconnected from {}", broker.hostname);
                channels.connected.store(false, Ordering::Release);
                channels.replies.send(Reply::Done(true)).await;
                return;
            }
        }
    }
}

async fn open_socket(
    stack: Stack<'static>,
    socket: &mut TcpSocket<'_>,
    broker: &BrokerConfig,
) -> Result<(), BrokerError> {
    let addr = stack
        .dns_query(broker.hostname, DnsQueryType::A)
        .await
        .map_err(|e| {
            warn!("DNS query for {} failed: {:?}", broker.hostname, e);
            BrokerError::DnsLookupFailed
        })?
        .first()
        .copied()
        .ok_or(BrokerError::DnsLookupFailed)?;

    info!("Connecting TCP socket to {}:{}", broker.hostname, broker.port);
    socket.connect((addr, broker.port)).await.map_err(|e| {
        warn!("TCP connect failed: {:?}", e);
        BrokerError::SocketConnectionError
    })?;
    info!("TCP connected");
    Ok(())
}

/// Errors after which the session cannot be reused
fn is_fatal(result: &Result<(), ReasonCode>) -> bool {
    matches!(result, Err(ReasonCode::NetworkError))
}
