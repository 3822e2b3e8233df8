//! Connection hub
//!
//! Owns the set of live connections for one relay instance, validates every
//! inbound payload as JSON and fans it out to the open connections.

mod connection;
mod message;
mod registry;
mod stats;

pub use connection::{
    Connection, ConnectionEvent, ConnectionId, ConnectionState, Recipient, SendOutcome,
};
pub use message::{PayloadMode, RawPayload, RelayMessage};
pub use registry::ConnectionRegistry;
pub use stats::HubStats;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use stats::HubCounters;

/// Default number of frames buffered per connection
pub const DEFAULT_SEND_BUFFER: usize = 256;

/// Whether the originating connection receives its own payload back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderPolicy {
    #[default]
    Include,
    Exclude,
}

impl SenderPolicy {
    pub fn from_include(include: bool) -> Self {
        if include {
            Self::Include
        } else {
            Self::Exclude
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }
}

/// Per-instance hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Instance name used in logs
    pub name: String,
    pub payload_mode: PayloadMode,
    pub sender_policy: SenderPolicy,
    /// Capacity of each connection's outbound queue
    pub send_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: "relay".to_string(),
            payload_mode: PayloadMode::Verbatim,
            sender_policy: SenderPolicy::Include,
            send_buffer: DEFAULT_SEND_BUFFER,
        }
    }
}

/// Outcome of one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Recipients whose queue accepted the frame
    pub delivered: usize,
    /// Recipients that were no longer open
    pub skipped: usize,
    /// Recipients whose queue was full
    pub dropped: usize,
}

/// The connection hub. Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct Hub {
    config: Arc<HubConfig>,
    registry: Arc<ConnectionRegistry>,
    counters: Arc<HubCounters>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            counters: Arc::new(HubCounters::default()),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a newly upgraded session.
    ///
    /// Returns the connection's identity and the receiving end of its
    /// outbound queue, which the connection's writer drains.
    pub fn accept(&self, peer: Option<SocketAddr>) -> (ConnectionId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(self.config.send_buffer.max(1));
        let id = self.registry.insert(Connection::open(tx, peer));
        HubCounters::incr(&self.counters.accepted);

        info!(
            relay = %self.config.name,
            connection = %id,
            peer = ?peer,
            connections = self.registry.len(),
            "Client connected"
        );

        (id, rx)
    }

    /// Validate a payload from `from` and broadcast it to the open set
    pub fn on_message(&self, from: ConnectionId, raw: RawPayload) -> Result<RelayReport> {
        match self.registry.state(from) {
            Some(ConnectionState::Open) => {}
            state => {
                return Err(RelayError::ConnectionNotOpen {
                    id: from,
                    state: state.unwrap_or(ConnectionState::Closed),
                })
            }
        }
        HubCounters::incr(&self.counters.received);

        let message = match RelayMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                HubCounters::incr(&self.counters.malformed);
                return Err(e);
            }
        };

        let frame = message.render(self.config.payload_mode);
        let exclude = match self.config.sender_policy {
            SenderPolicy::Include => None,
            SenderPolicy::Exclude => Some(from),
        };

        let mut report = RelayReport::default();
        for recipient in self.registry.open_recipients(exclude) {
            match recipient.deliver(frame.clone()) {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::NotOpen => report.skipped += 1,
                SendOutcome::QueueFull => {
                    debug!(
                        relay = %self.config.name,
                        connection = %recipient.id,
                        "Outbound buffer full, dropping frame"
                    );
                    report.dropped += 1;
                }
            }
        }

        HubCounters::incr(&self.counters.relayed);
        HubCounters::add(&self.counters.deliveries, report.delivered as u64);
        HubCounters::add(&self.counters.dropped, report.dropped as u64);

        debug!(
            relay = %self.config.name,
            from = %from,
            payload = %message.canonical(),
            delivered = report.delivered,
            skipped = report.skipped,
            dropped = report.dropped,
            "Relayed message"
        );

        Ok(report)
    }

    /// Peer-initiated close
    pub fn on_close(&self, id: ConnectionId) {
        if self.close(id) {
            info!(
                relay = %self.config.name,
                connection = %id,
                connections = self.registry.len(),
                "Client disconnected"
            );
        }
    }

    /// Transport error on the connection
    pub fn on_error(&self, id: ConnectionId, reason: &str) {
        if self.close(id) {
            warn!(
                relay = %self.config.name,
                connection = %id,
                connections = self.registry.len(),
                "Client dropped after transport error: {}",
                reason
            );
        }
    }

    fn close(&self, id: ConnectionId) -> bool {
        self.registry.mark_closing(id);
        self.registry.remove(id).is_some()
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.registry.state(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> HubStats {
        self.counters.snapshot(self.registry.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hub(payload_mode: PayloadMode, sender_policy: SenderPolicy) -> Hub {
        Hub::new(HubConfig {
            name: "test".to_string(),
            payload_mode,
            sender_policy,
            send_buffer: 64,
        })
    }

    fn text(s: &str) -> RawPayload {
        RawPayload::Text(s.to_string())
    }

    fn recv_text(rx: &mut mpsc::Receiver<Message>) -> Option<String> {
        match rx.try_recv().ok()? {
            Message::Text(t) => Some(t),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_accept_registers_open_connection() {
        let hub = Hub::new(HubConfig::default());
        let (id, _rx) = hub.accept(None);

        assert_eq!(hub.state(id), Some(ConnectionState::Open));
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.stats().accepted, 1);
    }

    #[test]
    fn test_broadcast_includes_sender() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Include);
        let (a, mut rx_a) = hub.accept(None);
        let (_b, mut rx_b) = hub.accept(None);
        let (_c, mut rx_c) = hub.accept(None);

        let report = hub.on_message(a, text("42")).unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(recv_text(&mut rx_a).as_deref(), Some("42"));
        assert_eq!(recv_text(&mut rx_b).as_deref(), Some("42"));
        assert_eq!(recv_text(&mut rx_c).as_deref(), Some("42"));
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Exclude);
        let (a, mut rx_a) = hub.accept(None);
        let (_b, mut rx_b) = hub.accept(None);
        let (_c, mut rx_c) = hub.accept(None);

        let report = hub.on_message(a, text("42")).unwrap();

        assert_eq!(report.delivered, 2);
        assert!(recv_text(&mut rx_a).is_none());
        assert_eq!(recv_text(&mut rx_b).as_deref(), Some("42"));
        assert_eq!(recv_text(&mut rx_c).as_deref(), Some("42"));
    }

    #[test]
    fn test_malformed_payload_is_isolated() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Include);
        let (a, mut rx_a) = hub.accept(None);
        let (b, mut rx_b) = hub.accept(None);

        let err = hub.on_message(a, text("not json")).unwrap_err();
        assert!(matches!(err, RelayError::MalformedPayload(_)));

        assert!(recv_text(&mut rx_a).is_none());
        assert!(recv_text(&mut rx_b).is_none());
        assert_eq!(hub.state(a), Some(ConnectionState::Open));
        assert_eq!(hub.state(b), Some(ConnectionState::Open));

        let stats = hub.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.relayed, 0);

        // The sender can keep going after a bad payload
        hub.on_message(a, text("7")).unwrap();
        assert_eq!(recv_text(&mut rx_b).as_deref(), Some("7"));
    }

    #[test]
    fn test_closed_connection_is_never_targeted() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Include);
        let (a, mut rx_a) = hub.accept(None);
        let (b, mut rx_b) = hub.accept(None);

        hub.on_close(b);
        assert!(hub.state(b).is_none());

        let report = hub.on_message(a, text("1")).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(recv_text(&mut rx_a).as_deref(), Some("1"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_message_from_closed_connection_is_rejected() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Include);
        let (a, _rx_a) = hub.accept(None);
        let (_b, mut rx_b) = hub.accept(None);

        hub.on_error(a, "connection reset");

        let err = hub.on_message(a, text("1")).unwrap_err();
        assert!(matches!(
            err,
            RelayError::ConnectionNotOpen {
                state: ConnectionState::Closed,
                ..
            }
        ));
        assert!(recv_text(&mut rx_b).is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let hub = Hub::new(HubConfig::default());
        let (a, _rx) = hub.accept(None);

        hub.on_close(a);
        hub.on_close(a);
        hub.on_error(a, "late error");
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_per_sender_order_is_preserved() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Exclude);
        let (a, _rx_a) = hub.accept(None);
        let (_b, mut rx_b) = hub.accept(None);

        for i in 0..50 {
            hub.on_message(a, text(&i.to_string())).unwrap();
        }

        let received: Vec<String> = std::iter::from_fn(|| recv_text(&mut rx_b)).collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_full_consumer_does_not_affect_others() {
        let hub = Hub::new(HubConfig {
            name: "test".to_string(),
            payload_mode: PayloadMode::Verbatim,
            sender_policy: SenderPolicy::Exclude,
            send_buffer: 2,
        });
        let (a, _rx_a) = hub.accept(None);
        let (_slow, mut rx_slow) = hub.accept(None);
        let (_fast, mut rx_fast) = hub.accept(None);

        let mut dropped = 0;
        for i in 0..5 {
            let report = hub.on_message(a, text(&i.to_string())).unwrap();
            dropped += report.dropped;
            // The fast consumer drains after every relay
            assert_eq!(recv_text(&mut rx_fast), Some(i.to_string()));
        }

        assert_eq!(dropped, 3);
        assert_eq!(hub.stats().dropped, 3);
        assert_eq!(recv_text(&mut rx_slow).as_deref(), Some("0"));
        assert_eq!(recv_text(&mut rx_slow).as_deref(), Some("1"));
        assert!(recv_text(&mut rx_slow).is_none());
    }

    #[test]
    fn test_gone_writer_is_skipped() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Exclude);
        let (a, _rx_a) = hub.accept(None);
        let (_b, rx_b) = hub.accept(None);
        let (_c, mut rx_c) = hub.accept(None);

        // Writer for b ended before the hub saw the close
        drop(rx_b);

        let report = hub.on_message(a, text("5")).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(recv_text(&mut rx_c).as_deref(), Some("5"));
    }

    #[test]
    fn test_canonical_relay_after_disconnect() {
        let hub = hub(PayloadMode::Canonical, SenderPolicy::Include);

        let (a, mut rx_a) = hub.accept(None);
        hub.on_message(a, text(" 2 ")).unwrap();
        assert_eq!(recv_text(&mut rx_a).as_deref(), Some("2"));
        hub.on_close(a);

        let (b, mut rx_b) = hub.accept(None);
        hub.on_message(b, text("3")).unwrap();

        assert_eq!(recv_text(&mut rx_b).as_deref(), Some("3"));
        assert!(recv_text(&mut rx_b).is_none());
    }

    #[test]
    fn test_verbatim_binary_stays_binary() {
        let hub = hub(PayloadMode::Verbatim, SenderPolicy::Exclude);
        let (a, _rx_a) = hub.accept(None);
        let (_b, mut rx_b) = hub.accept(None);

        hub.on_message(a, RawPayload::Binary(b"72".to_vec())).unwrap();

        match rx_b.try_recv().unwrap() {
            Message::Binary(bytes) => assert_eq!(bytes, b"72".to_vec()),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_accept_close_and_relay() {
        // Large enough that no queue ever fills during the run
        let hub = Hub::new(HubConfig {
            name: "test".to_string(),
            payload_mode: PayloadMode::Verbatim,
            sender_policy: SenderPolicy::Exclude,
            send_buffer: 512,
        });
        let (sender, _rx_sender) = hub.accept(None);
        let (_stable, mut rx_stable) = hub.accept(None);

        let drain = tokio::spawn(async move {
            let mut received = Vec::new();
            while received.len() < 200 {
                match rx_stable.recv().await {
                    Some(Message::Text(t)) => received.push(t),
                    _ => break,
                }
            }
            received
        });

        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let (id, _rx) = hub.accept(None);
                    tokio::task::yield_now().await;
                    hub.on_close(id);
                }
            })
        };

        let relay = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    hub.on_message(sender, RawPayload::Text(i.to_string())).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let received = tokio::time::timeout(Duration::from_secs(5), async {
            churn.await.unwrap();
            relay.await.unwrap();
            drain.await.unwrap()
        })
        .await
        .expect("relay under churn timed out");

        // The unaffected connection saw every message, in order
        let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
        assert_eq!(hub.connection_count(), 2);
        assert_eq!(hub.stats().dropped, 0);
    }
}
