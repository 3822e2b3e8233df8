//! Fanout - Real-time WebSocket Relay
//!
//! A minimal message relay: peers hold WebSocket connections to a hub and
//! every valid JSON payload one peer sends is rebroadcast to the connected set.
//!
//! ## Features
//!
//! - One hub per relay instance, each on its own port
//! - JSON validation before relay; malformed payloads are dropped
//! - Verbatim or canonical re-serialized forwarding
//! - Sender-inclusive or sender-exclusive broadcast
//! - Bounded per-connection outbound queues so slow peers never stall others
//! - Optional idle timeout and keep-alive pings

pub mod api;
pub mod config;
pub mod error;
pub mod hub;

pub use config::Config;
pub use error::{RelayError, Result};
pub use hub::Hub;
