//! Speculative execution with correction.
//!
//! Ticks are simulated as soon as local input exists, using the held remote
//! input as a prediction. Once real remote input covers ticks that were
//! predicted, the controller rewinds to the single snapshot at `SyncedTick`
//! and replays forward with the now-authoritative inputs. Every replayed tick
//! that is fully confirmed becomes the new snapshot.

use tandem_netproto::{Packet, PlayerState, constants::PLAYER_COUNT};
use tracing::{debug, trace};

use crate::{
    config::SessionConfig,
    core::{FastForwardGuard, PresentationFlags, SimulationCore},
    error::CoreError,
    input_history::{InputBook, RemoteUpdate},
};

use super::{SyncPoint, snapshot::Snapshot};

/// Result of one [`RollbackController::handle_rollbacks`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// Ticks re-simulated; 0 when no rollback was needed.
    pub replayed: u32,
    /// Desync checkpoints reached while replaying, oldest first.
    pub sync_points: Vec<SyncPoint>,
}

/// Cumulative rollback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackStats {
    pub rollbacks: u64,
    pub replayed_ticks: u64,
    pub deepest: u32,
}

/// Owns the simulation core, both input histories, the tick counters and the
/// rollback anchor.
///
/// Invariant: `synced_tick <= confirmed_tick` whenever the confirmed tick has
/// been simulated, and `synced_tick <= local_tick - 1`.
pub struct RollbackController<C> {
    core: C,
    inputs: InputBook,
    local_slot: usize,
    /// Next tick to simulate.
    local_tick: i64,
    synced_tick: i64,
    snapshot: Snapshot,
    current_inputs: [PlayerState; PLAYER_COUNT],
    desync_check_rate: i64,
    rollback_max_frames: i64,
    stats: RollbackStats,
}

impl<C: SimulationCore> RollbackController<C> {
    /// Wrap `core` and take the initial snapshot (tick -1, before any step).
    pub fn new(core: C, config: &SessionConfig) -> Result<Self, CoreError> {
        let neutral = [PlayerState::NEUTRAL; PLAYER_COUNT];
        let snapshot = Snapshot::capture(&core, -1, neutral)?;
        Ok(Self {
            core,
            inputs: InputBook::new(
                config.history_size,
                config.input_delay_frames,
                config.rollback_max_frames,
            ),
            local_slot: config.local_slot,
            local_tick: 0,
            synced_tick: -1,
            snapshot,
            current_inputs: neutral,
            desync_check_rate: i64::from(config.desync_check_rate.max(1)),
            rollback_max_frames: i64::from(config.rollback_max_frames),
            stats: RollbackStats::default(),
        })
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }

    pub fn inputs(&self) -> &InputBook {
        &self.inputs
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn stats(&self) -> RollbackStats {
        self.stats
    }

    /// Next tick to simulate (`LocalTick`).
    pub fn local_tick(&self) -> i64 {
        self.local_tick
    }

    /// Most recently simulated tick.
    pub fn last_game_tick(&self) -> i64 {
        self.local_tick - 1
    }

    pub fn confirmed_tick(&self) -> i64 {
        self.inputs.confirmed_tick()
    }

    pub fn synced_tick(&self) -> i64 {
        self.synced_tick
    }

    /// `LocalTick - ConfirmedTick`, the lead this side reports to its peer.
    pub fn local_tick_delta(&self) -> i64 {
        self.local_tick - self.inputs.confirmed_tick()
    }

    /// Inputs the core was last stepped with.
    pub fn current_inputs(&self) -> [PlayerState; PLAYER_COUNT] {
        self.current_inputs
    }

    /// Whether one more step keeps `LocalTick` within `rollback_max_frames` of
    /// `ConfirmedTick`.
    pub fn window_open(&self) -> bool {
        self.local_tick + 1 - self.inputs.confirmed_tick() <= self.rollback_max_frames
    }

    pub fn set_local_input(&mut self, tick: i64, state: PlayerState) {
        self.inputs.set_local_input(tick, state);
    }

    pub fn apply_remote(&mut self, packet: &Packet) -> RemoteUpdate {
        self.inputs.apply_remote(packet)
    }

    /// Per-slot inputs for `tick`: local is authoritative, remote is
    /// confirmed or predicted.
    pub fn inputs_for(&self, tick: i64) -> [PlayerState; PLAYER_COUNT] {
        let mut inputs = [PlayerState::NEUTRAL; PLAYER_COUNT];
        for (slot, input) in inputs.iter_mut().enumerate() {
            *input = if slot == self.local_slot {
                self.inputs.local_input_state(tick)
            } else {
                self.inputs.remote_input_state(tick)
            };
        }
        inputs
    }

    /// Serialized core state, as captured into a snapshot.
    pub fn serialize(&self) -> Result<Vec<u8>, CoreError> {
        Snapshot::capture(&self.core, self.last_game_tick(), self.current_inputs)
            .map(|snap| snap.state)
    }

    /// Restore core state, inputs and tick counter from the snapshot.
    pub fn unserialize(&mut self) -> Result<(), CoreError> {
        self.snapshot.restore(&mut self.core)?;
        self.local_tick = self.snapshot.tick + 1;
        self.current_inputs = self.snapshot.inputs;
        Ok(())
    }

    /// Ticks exist that were simulated with predicted input and real input
    /// for at least one of them has since arrived.
    pub fn needs_rollback(&self) -> bool {
        self.last_game_tick() > self.synced_tick && self.inputs.confirmed_tick() > self.synced_tick
    }

    /// Simulate `LocalTick` once and advance it.
    ///
    /// If the stepped tick directly follows `SyncedTick` and is confirmed, it
    /// becomes the new snapshot; every `desync_check_rate` synced ticks a
    /// [`SyncPoint`] is returned.
    pub fn step(&mut self) -> Result<Option<SyncPoint>, CoreError> {
        let tick = self.local_tick;
        let inputs = self.inputs_for(tick);
        self.core.step(&inputs);
        self.current_inputs = inputs;
        self.local_tick += 1;
        trace!(tick, predicted = self.inputs.is_predicted(tick), "stepped");

        if tick == self.synced_tick + 1 && tick <= self.inputs.confirmed_tick() {
            return self.mark_synced(tick);
        }
        Ok(None)
    }

    fn mark_synced(&mut self, tick: i64) -> Result<Option<SyncPoint>, CoreError> {
        self.snapshot
            .recapture(&self.core, tick, self.current_inputs)?;
        self.synced_tick = tick;
        if tick % self.desync_check_rate == 0 {
            return Ok(Some(SyncPoint {
                tick,
                checksum: self.snapshot.checksum(),
            }));
        }
        Ok(None)
    }

    /// Rewind to `SyncedTick` and replay every speculatively simulated tick
    /// with the inputs known now.
    ///
    /// `fast_forward` is raised for the duration. On a core error the replay
    /// is abandoned mid-way; the caller must end the session.
    pub fn handle_rollbacks(
        &mut self,
        flags: &PresentationFlags,
    ) -> Result<RollbackOutcome, CoreError> {
        if !self.needs_rollback() {
            return Ok(RollbackOutcome::default());
        }

        let last_game_tick = self.last_game_tick();
        let rollback_frames = last_game_tick - self.synced_tick;
        let _fast_forward = FastForwardGuard::engage(flags);

        self.unserialize()?;
        let mut outcome = RollbackOutcome::default();
        for _ in 0..rollback_frames {
            if let Some(point) = self.step()? {
                outcome.sync_points.push(point);
            }
        }
        debug_assert_eq!(self.last_game_tick(), last_game_tick);

        outcome.replayed = rollback_frames as u32;
        self.stats.rollbacks += 1;
        self.stats.replayed_ticks += rollback_frames as u64;
        self.stats.deepest = self.stats.deepest.max(outcome.replayed);
        debug!(
            replayed = outcome.replayed,
            synced = self.synced_tick,
            confirmed = self.inputs.confirmed_tick(),
            "rollback"
        );
        Ok(outcome)
    }
}
