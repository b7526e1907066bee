//! Rollback synchronization.
//!
//! - [`clock`]: keeps the faster peer from running away from the slower one
//! - [`rollback`]: speculative stepping, rewind and replay
//! - [`snapshot`]: the single retained rollback anchor
//! - [`desync`]: checksum exchange and divergence detection

pub mod clock;
pub mod desync;
pub mod rollback;
pub mod snapshot;

/// Checksum of the synced state at a tick selected for desync checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPoint {
    pub tick: i64,
    pub checksum: u32,
}
