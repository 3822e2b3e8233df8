//! WebSocket handlers
//!
//! Each connection gets a reader loop feeding the hub and a writer task
//! draining the connection's bounded outbound queue.

pub mod relay;
