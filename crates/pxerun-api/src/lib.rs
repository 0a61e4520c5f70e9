// pxerun-api: Async Rust client for the Packet bare-metal device API

pub mod client;
pub mod error;
pub mod transport;
pub mod types;

pub use client::{DEFAULT_API_URL, PacketClient};
pub use error::Error;
pub use transport::TransportConfig;
