//! The reconnecting line transport (spec §3, §4.8), grounded in
//! `frappy/lib/asynconn.py`'s `AsynConn`/`AsynTcp` reconnect/cancellation
//! idioms.
//!
//! Used by IO-capable modules that themselves speak a line protocol to real
//! hardware (frappy `HasIO`/`StringIO`), not by the server's own client
//! listener (`crate::node` owns that accept loop directly).

pub mod reconnect;
pub mod secop_client;
#[cfg(feature = "serial")]
pub mod serial;
pub mod tcp;

pub use reconnect::ReconnectingLineTransport;
pub use secop_client::SecopClientConnection;
pub use tcp::TcpLineTransport;

use async_trait::async_trait;

use crate::errors::Result;

/// One live line connection to a piece of hardware.
#[async_trait]
pub trait LineTransport: Send + Sync {
    async fn write_line(&self, line: &str) -> Result<()>;
    async fn read_line(&self) -> Result<String>;
    async fn disconnect(&self);
}
