//! Capabilities the session is constructed with.
//!
//! The session never reaches for globals: the simulation, the local input
//! device and the presentation flags are all handed to it up front.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tandem_netproto::{PlayerState, constants::PLAYER_COUNT};

use crate::error::CoreError;

/// A deterministic simulation that can be snapshotted and stepped.
///
/// Given the same serialized state and the same input sequence, `step` must
/// produce bit-identical results on both peers. Anything that breaks that
/// (wall-clock reads, uninitialized memory, hash iteration order) shows up as
/// a desync.
pub trait SimulationCore {
    /// Bytes needed by [`serialize`](Self::serialize).
    fn serialize_size(&self) -> usize;

    /// Write the full simulation state into `out` (`out.len() == serialize_size()`).
    fn serialize(&self, out: &mut [u8]) -> Result<(), CoreError>;

    /// Restore state previously produced by `serialize`.
    fn unserialize(&mut self, data: &[u8]) -> Result<(), CoreError>;

    /// Advance exactly one tick with the given per-slot inputs.
    fn step(&mut self, inputs: &[PlayerState; PLAYER_COUNT]);
}

/// Local controller input.
pub trait InputSource {
    /// Sample the device. Called once per stepped frame, before `latest`.
    fn poll(&mut self);

    /// Most recently polled state for `slot`.
    fn latest(&self, slot: usize) -> PlayerState;
}

impl<C: SimulationCore + ?Sized> SimulationCore for Box<C> {
    fn serialize_size(&self) -> usize {
        (**self).serialize_size()
    }

    fn serialize(&self, out: &mut [u8]) -> Result<(), CoreError> {
        (**self).serialize(out)
    }

    fn unserialize(&mut self, data: &[u8]) -> Result<(), CoreError> {
        (**self).unserialize(data)
    }

    fn step(&mut self, inputs: &[PlayerState; PLAYER_COUNT]) {
        (**self).step(inputs)
    }
}

impl<I: InputSource + ?Sized> InputSource for Box<I> {
    fn poll(&mut self) {
        (**self).poll()
    }

    fn latest(&self, slot: usize) -> PlayerState {
        (**self).latest(slot)
    }
}

/// Flags shared with the presentation layer.
///
/// `fast_forward` is raised by the session while it silently replays ticks
/// during a rollback; audio/video should be suppressed while it is set.
/// `force_pause` is raised by the caller; while set the session does not step.
#[derive(Debug, Clone, Default)]
pub struct PresentationFlags {
    fast_forward: Arc<AtomicBool>,
    force_pause: Arc<AtomicBool>,
}

impl PresentationFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fast_forward(&self) -> bool {
        self.fast_forward.load(Ordering::Acquire)
    }

    pub(crate) fn set_fast_forward(&self, on: bool) {
        self.fast_forward.store(on, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.force_pause.load(Ordering::Acquire)
    }

    pub fn set_force_pause(&self, paused: bool) {
        self.force_pause.store(paused, Ordering::Release);
    }
}

/// Clears `fast_forward` when dropped, including on early `?` returns.
pub(crate) struct FastForwardGuard<'a>(&'a PresentationFlags);

impl<'a> FastForwardGuard<'a> {
    pub(crate) fn engage(flags: &'a PresentationFlags) -> Self {
        flags.set_fast_forward(true);
        Self(flags)
    }
}

impl Drop for FastForwardGuard<'_> {
    fn drop(&mut self) {
        self.0.set_fast_forward(false);
    }
}
