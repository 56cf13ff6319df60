//! Collaborator seams for the network link and the publish/subscribe sessions.
#![allow(async_fn_in_trait)]

use heapless::{Deque, String, Vec};
use log::warn;

use crate::constants::{INBOUND_QUEUE_DEPTH, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// The link cannot come up with the configured credentials
    Misconfigured,
    /// The radio driver refused to start
    RadioFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    DnsLookupFailed,
    SocketConnectionError,
    ConnectionRefused,
    SessionClosed,
    TopicTooLong,
    PayloadTooLarge,
}

/// The underlying network link (Wi-Fi association plus IP configuration)
pub trait Network {
    /// True once the link is associated and has an address.
    fn is_up(&self) -> bool;

    /// Starts association. Returns once the attempt is under way; the caller
    /// polls [`Network::is_up`].
    async fn bring_up(&mut self) -> Result<(), NetworkError>;

    /// Drops the link and powers the radio down.
    async fn shut_down(&mut self);
}

/// One publish/subscribe session with a broker
pub trait Broker {
    fn is_connected(&self) -> bool;

    async fn connect(&mut self, client_id: &str) -> Result<(), BrokerError>;

    /// Publishes `payload` on `topic`; true when the broker accepted it.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    async fn subscribe(&mut self, topic_filter: &str) -> bool;

    /// Message pump: returns the next buffered inbound message, if any.
    async fn poll(&mut self) -> Option<InboundMessage>;

    /// Pings the broker when the keep-alive interval is due. False when the
    /// session turned out to be dead; it then reads as disconnected.
    async fn keep_alive(&mut self) -> bool;

    async fn disconnect(&mut self);
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: &[u8]) -> Result<Self, BrokerError> {
        let mut owned_topic = String::new();
        owned_topic
            .push_str(topic)
            .map_err(|_| BrokerError::TopicTooLong)?;
        let owned_payload = Vec::from_slice(payload).map_err(|_| BrokerError::PayloadTooLarge)?;
        Ok(Self {
            topic: owned_topic,
            payload: owned_payload,
        })
    }
}

/// Inbound control messages waiting to be applied, oldest first
pub struct InboundQueue {
    messages: Deque<InboundMessage, INBOUND_QUEUE_DEPTH>,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundQueue {
    pub const fn new() -> Self {
        Self {
            messages: Deque::new(),
        }
    }

    /// Queues a message. When full, the new message is dropped.
    pub fn push(&mut self, message: InboundMessage) -> bool {
        match self.messages.push_back(message) {
            Ok(()) => true,
            Err(dropped) => {
                warn!("Inbound queue full, dropping message on {}", dropped.topic);
                false
            }
        }
    }

    pub fn pop(&mut self) -> Option<InboundMessage> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo_and_bounded() {
        let mut queue = InboundQueue::new();
        for i in 0..INBOUND_QUEUE_DEPTH + 2 {
            let payload = [b'0' + (i % 10) as u8];
            let accepted = queue.push(InboundMessage::new("templogger/admin/num", &payload).unwrap());
            assert_eq!(accepted, i < INBOUND_QUEUE_DEPTH);
        }
        assert_eq!(queue.len(), INBOUND_QUEUE_DEPTH);
        assert_eq!(queue.pop().unwrap().payload.as_slice(), b"0");
        assert_eq!(queue.pop().unwrap().payload.as_slice(), b"1");
    }

    #[test]
    fn oversized_messages_are_refused() {
        let long_topic = "t".repeat(MAX_TOPIC_LEN + 1);
        assert_eq!(
            InboundMessage::new(&long_topic, b"1"),
            Err(BrokerError::TopicTooLong)
        );
        let big_payload = [b'9'; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            InboundMessage::new("templogger/admin/int", &big_payload),
            Err(BrokerError::PayloadTooLarge)
        );
    }
}
