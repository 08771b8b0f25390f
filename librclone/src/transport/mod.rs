//! QUIC transport for [`CsiMessage`](crate::message::CsiMessage) values.
//!
//! [`CsiClient`](client::CsiClient) and [`CsiServer`](server::CsiServer)
//! exchange one request and one response per bi-directional stream.

pub mod client;
pub mod server;

/// Upper bound on a single encoded message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
