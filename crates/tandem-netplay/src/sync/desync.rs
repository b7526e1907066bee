//! Cross-peer consistency verification.
//!
//! Both peers checksum their synced state at the same ticks and exchange the
//! results. Matching ticks are compared as soon as both values are known; a
//! mismatch is permanent.

use std::collections::BTreeMap;

use tracing::{error, trace, warn};

use super::SyncPoint;

/// First detected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesyncReport {
    pub tick: i64,
    pub local: u32,
    pub remote: u32,
}

#[derive(Debug)]
pub struct DesyncDetector {
    /// How far past the newest local checkpoint a remote checkpoint may be.
    horizon: i64,
    newest_local: i64,
    local: BTreeMap<i64, u32>,
    remote: BTreeMap<i64, u32>,
    /// Newest tick compared so far; anything at or below it is discarded.
    verified_tick: Option<i64>,
    compared: u64,
    report: Option<DesyncReport>,
}

impl DesyncDetector {
    pub fn new(horizon: i64) -> Self {
        Self {
            horizon,
            newest_local: -1,
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            verified_tick: None,
            compared: 0,
            report: None,
        }
    }

    /// Record this side's checksum. Returns the report if this completes a
    /// mismatching pair (or a desync was already detected).
    pub fn record_local(&mut self, point: SyncPoint) -> Option<DesyncReport> {
        self.newest_local = self.newest_local.max(point.tick);
        if !self.is_stale(point.tick) {
            self.local.insert(point.tick, point.checksum);
            self.compare(point.tick);
        }
        self.report
    }

    /// Record the peer's checksum. Duplicates are harmless; ticks further
    /// ahead than the peer can have synced are dropped.
    pub fn record_remote(&mut self, point: SyncPoint) -> Option<DesyncReport> {
        if point.tick > self.newest_local.saturating_add(self.horizon) {
            warn!(
                tick = point.tick,
                newest_local = self.newest_local,
                "sync point beyond peer horizon"
            );
            return self.report;
        }
        if !self.is_stale(point.tick) {
            self.remote.insert(point.tick, point.checksum);
            self.compare(point.tick);
        }
        self.report
    }

    pub fn report(&self) -> Option<DesyncReport> {
        self.report
    }

    pub fn is_desynced(&self) -> bool {
        self.report.is_some()
    }

    /// Number of ticks compared on both sides.
    pub fn compared(&self) -> u64 {
        self.compared
    }

    pub fn verified_tick(&self) -> Option<i64> {
        self.verified_tick
    }

    fn is_stale(&self, tick: i64) -> bool {
        self.verified_tick.is_some_and(|verified| tick <= verified)
    }

    fn compare(&mut self, tick: i64) {
        let (Some(&local), Some(&remote)) = (self.local.get(&tick), self.remote.get(&tick)) else {
            return;
        };
        self.compared += 1;
        self.verified_tick = Some(tick);
        self.local.retain(|&t, _| t > tick);
        self.remote.retain(|&t, _| t > tick);

        if local == remote {
            trace!(tick, checksum = local, "sync verified");
            return;
        }
        if self.report.is_none() {
            error!(tick, local, remote, "desync detected");
            self.report = Some(DesyncReport {
                tick,
                local,
                remote,
            });
        }
    }
}
