//! The single retained rollback anchor.

use tandem_netproto::{PlayerState, constants::PLAYER_COUNT};

use crate::{core::SimulationCore, error::CoreError};

/// Serialized simulation state at `SyncedTick`.
///
/// Only one of these exists per session: rollback never needs anything older
/// than the last tick both sides are known to agree on.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Last tick whose step is contained in `state`; -1 before the first step.
    pub tick: i64,
    /// Output of [`SimulationCore::serialize`].
    pub state: Vec<u8>,
    /// Inputs the core was last stepped with.
    pub inputs: [PlayerState; PLAYER_COUNT],
}

impl Snapshot {
    /// Capture `core` as the state after stepping `tick`.
    pub fn capture<C: SimulationCore + ?Sized>(
        core: &C,
        tick: i64,
        inputs: [PlayerState; PLAYER_COUNT],
    ) -> Result<Self, CoreError> {
        let mut state = vec![0u8; core.serialize_size()];
        core.serialize(&mut state)?;
        Ok(Self {
            tick,
            state,
            inputs,
        })
    }

    /// Capture into this snapshot, reusing its allocation.
    pub fn recapture<C: SimulationCore + ?Sized>(
        &mut self,
        core: &C,
        tick: i64,
        inputs: [PlayerState; PLAYER_COUNT],
    ) -> Result<(), CoreError> {
        self.state.resize(core.serialize_size(), 0);
        core.serialize(&mut self.state)?;
        self.tick = tick;
        self.inputs = inputs;
        Ok(())
    }

    /// Load this snapshot back into `core`.
    pub fn restore<C: SimulationCore + ?Sized>(&self, core: &mut C) -> Result<(), CoreError> {
        core.unserialize(&self.state)
    }

    /// CRC32 over the serialized state.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.state)
    }
}
