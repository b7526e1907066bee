//! Netplay error types.

use thiserror::Error;

/// Failure reported by a [`crate::core::SimulationCore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("simulation core: {0}")]
pub struct CoreError(pub String);

impl CoreError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum NetplayError {
    #[error("not connected to peer")]
    NotConnected,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no handshake from peer within {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("peer silent for {0:?}")]
    PeerTimedOut(std::time::Duration),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] tandem_netproto::ProtoError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Both peers checksummed the same synced tick and disagree.
    ///
    /// There is no resync protocol; the session is over.
    #[error("desync at tick {tick}: local checksum {local:#010x}, remote {remote:#010x}")]
    Desync { tick: i64, local: u32, remote: u32 },
}
