//! Connection identity, lifecycle and inbound events

use std::fmt;
use std::net::SocketAddr;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::RawPayload;
use crate::error::{RelayError, Result};

/// Identity of one accepted transport session. Never sent to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Transport accepted, not yet registered
    Connecting,
    /// Registered and eligible for relays
    Open,
    /// Close observed, removal in progress
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Closing)
                | (Open, Closed)
                | (Closing, Closed)
        )
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// One live connection as held by the registry
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Message>,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<Message>, peer: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            state: ConnectionState::Connecting,
            peer,
            connected_at: Utc::now(),
            outbound,
        }
    }

    /// A connection that has completed its handshake
    pub fn open(outbound: mpsc::Sender<Message>, peer: Option<SocketAddr>) -> Self {
        let mut connection = Self::new(outbound, peer);
        connection.state = ConnectionState::Open;
        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn transition_to(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub(super) fn recipient(&self) -> Recipient {
        Recipient {
            id: self.id,
            outbound: self.outbound.clone(),
        }
    }
}

/// Outcome of handing one frame to one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The recipient's writer is gone
    NotOpen,
    /// The recipient's outbound queue is full; frame dropped for it only
    QueueFull,
}

/// Snapshot of a connection's send capability taken for one relay
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: ConnectionId,
    outbound: mpsc::Sender<Message>,
}

impl Recipient {
    /// Non-blocking hand-off to the recipient's writer
    pub fn deliver(&self, frame: Message) -> SendOutcome {
        match self.outbound.try_send(frame) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotOpen,
        }
    }
}

/// Inbound transport event for one connection
#[derive(Debug)]
pub enum ConnectionEvent {
    Message(RawPayload),
    /// Ping/pong traffic: keeps the connection alive, nothing to relay
    Activity,
    Close(Option<String>),
    Error(String),
    /// Liveness timeout expired without any inbound frame
    Idle,
}

impl ConnectionEvent {
    /// Classify the next item read from the socket. `None` means the stream ended.
    pub fn from_frame(frame: Option<std::result::Result<Message, axum::Error>>) -> Self {
        match frame {
            None => ConnectionEvent::Close(None),
            Some(Err(e)) => ConnectionEvent::Error(e.to_string()),
            Some(Ok(Message::Text(text))) => ConnectionEvent::Message(RawPayload::Text(text)),
            Some(Ok(Message::Binary(bytes))) => ConnectionEvent::Message(RawPayload::Binary(bytes)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => ConnectionEvent::Activity,
            Some(Ok(Message::Close(frame))) => {
                ConnectionEvent::Close(frame.map(|f| format!("{} {}", u16::from(f.code), f.reason)))
            }
        }
    }
}
