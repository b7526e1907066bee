//! Tick-rate throttling between the two peers.
//!
//! Each side knows how far its own simulation runs ahead of the input it has
//! confirmed (`local_tick_delta`) and, from every `PlayerInput`, the same
//! figure for the peer (`remote_tick_delta`). Half their difference is a
//! symmetric estimate of how many ticks this side is ahead. The faster side
//! sheds that lead by skipping one step per newly confirmed tick; the slower
//! side is never asked to speed up.

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ClockSync {
    tick_offset: f64,
    syncing: bool,
    skipped: u64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per frame. Returns `true` when this frame's step must be skipped.
    ///
    /// `confirmed_advanced` is whether `ConfirmedTick` moved forward since the
    /// previous call; nothing is decided on frames without new confirmation.
    pub fn update(
        &mut self,
        confirmed_advanced: bool,
        local_tick_delta: i64,
        remote_tick_delta: i64,
    ) -> bool {
        if !confirmed_advanced {
            return false;
        }

        if !self.syncing {
            self.tick_offset = local_tick_delta.saturating_sub(remote_tick_delta) as f64 / 2.0;
            if self.tick_offset < 1.0 {
                return false;
            }
            self.syncing = true;
            debug!(
                tick_offset = self.tick_offset,
                local_tick_delta, remote_tick_delta, "ahead of peer, throttling"
            );
        }

        self.tick_offset -= 1.0;
        self.skipped += 1;
        if self.tick_offset < 1.0 {
            self.syncing = false;
            debug!(skipped = self.skipped, "clock sync settled");
        }
        true
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn tick_offset(&self) -> f64 {
        self.tick_offset
    }

    /// Total steps skipped over the session.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
