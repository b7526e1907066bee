//! Two-peer rollback netplay
//!
//! This crate runs a deterministic simulation in lockstep with one remote
//! peer over an unreliable datagram link. Local input is applied
//! immediately; remote input is predicted and corrected by rewinding to the
//! last agreed-upon state and replaying.
//!
//! # Architecture
//!
//! - [`session`]: per-frame orchestration and the session state machine
//! - [`sync`]: rollback, clock synchronization and desync detection
//! - [`input_history`]: local and remote input ring buffers
//! - [`transport`]: UDP and in-memory datagram transports
//! - [`core`](self::core): traits implemented by the embedding application
//! - [`config`]: session tunables
//! - [`error`]: Error types

pub mod config;
pub mod core;
pub mod error;
pub mod input_history;
pub mod session;
pub mod sync;
pub mod transport;

// Re-export commonly used types
pub use config::SessionConfig;
pub use self::core::{InputSource, PresentationFlags, SimulationCore};
pub use error::{CoreError, NetplayError};
pub use session::{FrameReport, Session, SessionState, SessionStats, Stall};
pub use sync::desync::DesyncReport;
pub use tandem_netproto::{Button, PlayerState, constants::PLAYER_COUNT};
pub use transport::{Inbound, MemoryLink, MemoryTransport, Transport, UdpTransport};
