//! Core reliability and protocol layer: the congestion-controlled,
//! acknowledgment-driven chat wire running on top of TCP.

pub mod admin;
pub mod congestion;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod fault_injector;
pub mod message;
pub mod metrics;
pub mod receive_pipeline;
pub mod registry;
pub mod send_pipeline;
pub mod server;
pub mod supervisor;
pub mod utils;

pub const MAX_MESSAGE_SIZE: u32 = 65536;
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_ADMIN_PORT: u16 = 8889;
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
pub const ACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
pub const PROTOCOL_VERSION: &str = "1.0";

pub use congestion::{CONGESTION_WINDOW_INITIAL, SLOW_START_THRESHOLD};
pub use connection::ConnectionHandle;
pub use error::{ConnectionError, ProtocolError};
pub use message::{Message, MessageType, Priority};
pub use registry::Registry;
pub use send_pipeline::DEFAULT_MAX_RETRANSMISSIONS;
pub use server::{ChatServer, ServerConfig};
