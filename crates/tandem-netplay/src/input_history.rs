//! Per-tick controller history for both sides of the session.
//!
//! Inputs live in fixed-size ring buffers indexed by `tick mod history_size`.
//! Writes are keyed purely by tick, so applying the same packet twice, or
//! packets out of order within the send window, leaves the history unchanged.

use tandem_netproto::{Packet, PlayerState, constants::SEND_HISTORY_SIZE};
use tracing::{trace, warn};

/// Ring buffer of encoded controller states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputHistory {
    slots: Vec<PlayerState>,
}

impl InputHistory {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![PlayerState::NEUTRAL; size.max(1)],
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, tick: i64) -> usize {
        tick.rem_euclid(self.slots.len() as i64) as usize
    }

    pub fn set(&mut self, tick: i64, state: PlayerState) {
        let i = self.index(tick);
        self.slots[i] = state;
    }

    pub fn get(&self, tick: i64) -> PlayerState {
        self.slots[self.index(tick)]
    }
}

/// Outcome of applying one remote `PlayerInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteUpdate {
    /// `ConfirmedTick` moved forward.
    pub advanced: bool,
    /// Ticks that could not be recovered because every packet carrying them was lost.
    pub gap: u64,
    /// The packet claimed a tick the peer cannot have reached and was dropped.
    pub rejected: bool,
}

/// Local and remote input histories plus the confirmation frontier.
#[derive(Debug, Clone)]
pub struct InputBook {
    local: InputHistory,
    remote: InputHistory,
    confirmed_tick: i64,
    newest_local_tick: i64,
    input_delay: i64,
    rollback_max: i64,
}

impl InputBook {
    pub fn new(history_size: usize, input_delay_frames: u32, rollback_max_frames: u32) -> Self {
        let input_delay = i64::from(input_delay_frames);
        Self {
            local: InputHistory::new(history_size),
            remote: InputHistory::new(history_size),
            confirmed_tick: -1,
            // Ticks below the delay are never written and stay neutral on both sides.
            newest_local_tick: input_delay - 1,
            input_delay,
            rollback_max: i64::from(rollback_max_frames),
        }
    }

    /// Highest tick for which real remote input has arrived, or -1.
    pub fn confirmed_tick(&self) -> i64 {
        self.confirmed_tick
    }

    /// Newest tick that holds local input.
    pub fn newest_local_tick(&self) -> i64 {
        self.newest_local_tick
    }

    /// Record input captured while simulating `tick`; it takes effect at
    /// `tick + input_delay` so it can reach the peer before it is needed.
    pub fn set_local_input(&mut self, tick: i64, state: PlayerState) {
        let target = tick + self.input_delay;
        self.local.set(target, state);
        self.newest_local_tick = self.newest_local_tick.max(target);
    }

    pub fn local_input_state(&self, tick: i64) -> PlayerState {
        if tick < self.input_delay {
            return PlayerState::NEUTRAL;
        }
        self.local.get(tick)
    }

    /// Remote input for `tick`; beyond `ConfirmedTick` the last confirmed
    /// input is held as the prediction.
    pub fn remote_input_state(&self, tick: i64) -> PlayerState {
        let tick = tick.min(self.confirmed_tick);
        if tick < 0 {
            return PlayerState::NEUTRAL;
        }
        self.remote.get(tick)
    }

    /// Whether `tick` used a prediction for remote input.
    pub fn is_predicted(&self, tick: i64) -> bool {
        tick > self.confirmed_tick
    }

    /// Highest remote tick the peer can have produced input for.
    ///
    /// The peer stalls `rollback_max` ticks past the newest input it has from
    /// us and schedules its own input `input_delay` ticks ahead of that.
    pub fn reach(&self) -> i64 {
        self.newest_local_tick
            .saturating_add(self.rollback_max)
            .saturating_add(self.input_delay)
    }

    /// Apply a remote `PlayerInput`. Anything else is ignored.
    pub fn apply_remote(&mut self, packet: &Packet) -> RemoteUpdate {
        let Packet::PlayerInput { tick, .. } = *packet else {
            return RemoteUpdate::default();
        };
        if tick <= self.confirmed_tick {
            trace!(tick, confirmed = self.confirmed_tick, "stale input packet");
            return RemoteUpdate::default();
        }
        if tick > self.reach() {
            warn!(tick, reach = self.reach(), "input packet beyond peer reach");
            return RemoteUpdate {
                rejected: true,
                ..RemoteUpdate::default()
            };
        }

        let oldest = tick - (SEND_HISTORY_SIZE as i64 - 1);
        let mut update = RemoteUpdate {
            advanced: true,
            ..RemoteUpdate::default()
        };
        if oldest > self.confirmed_tick + 1 {
            let held = self.remote_input_state(self.confirmed_tick);
            // Slots older than one lap of the ring would be overwritten anyway.
            let first = (self.confirmed_tick + 1)
                .max(oldest - self.remote.size() as i64)
                .max(0);
            for missing in first..oldest {
                self.remote.set(missing, held);
            }
            update.gap = (oldest - first).max(0) as u64;
            warn!(
                from = self.confirmed_tick + 1,
                to = oldest - 1,
                "remote input lost for ticks, holding last confirmed input"
            );
        }

        for (t, state) in packet.input_ticks() {
            if t > self.confirmed_tick {
                self.remote.set(t, state);
            }
        }
        self.confirmed_tick = tick;
        update
    }

    /// Local inputs for the outgoing `PlayerInput`, oldest first, ending at
    /// [`newest_local_tick`](Self::newest_local_tick).
    pub fn outgoing_window(&self) -> [PlayerState; SEND_HISTORY_SIZE] {
        let newest = self.newest_local_tick;
        std::array::from_fn(|i| {
            let tick = newest - (SEND_HISTORY_SIZE - 1 - i) as i64;
            if tick < 0 {
                PlayerState::NEUTRAL
            } else {
                self.local_input_state(tick)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(bits: u32) -> PlayerState {
        PlayerState::from_bits_truncate(bits)
    }

    fn book(input_delay_frames: u32) -> InputBook {
        InputBook::new(60, input_delay_frames, 16)
    }

    fn input_packet(tick: i64, source: impl Fn(i64) -> u32) -> Packet {
        Packet::PlayerInput {
            tick_delta: 0,
            tick,
            inputs: std::array::from_fn(|i| {
                let t = tick - (SEND_HISTORY_SIZE - 1 - i) as i64;
                if t < 0 { PlayerState::NEUTRAL } else { state(source(t)) }
            }),
        }
    }

    #[test]
    fn ring_buffer_wraps_by_tick() {
        let mut history = InputHistory::new(4);
        history.set(1, state(1));
        history.set(5, state(5));
        assert_eq!(history.get(1), state(5));
        assert_eq!(history.get(-3), state(5));
    }

    #[test]
    fn local_input_is_scheduled_after_delay() {
        let mut book = book(3);
        assert_eq!(book.newest_local_tick(), 2);
        book.set_local_input(0, state(0b1));
        assert_eq!(book.local_input_state(0), PlayerState::NEUTRAL);
        assert_eq!(book.local_input_state(3), state(0b1));
        assert_eq!(book.newest_local_tick(), 3);

        let window = book.outgoing_window();
        assert_eq!(window[SEND_HISTORY_SIZE - 1], state(0b1));
        assert!(window[..SEND_HISTORY_SIZE - 1].iter().all(|s| *s == PlayerState::NEUTRAL));
    }

    #[test]
    fn remote_prediction_holds_last_confirmed() {
        let mut book = book(0);
        assert_eq!(book.remote_input_state(0), PlayerState::NEUTRAL);
        assert!(book.is_predicted(0));

        let update = book.apply_remote(&input_packet(2, |t| t as u32 + 1));
        assert!(update.advanced);
        assert_eq!(update.gap, 0);
        assert_eq!(book.confirmed_tick(), 2);
        assert_eq!(book.remote_input_state(1), state(2));
        assert_eq!(book.remote_input_state(2), state(3));
        assert_eq!(book.remote_input_state(9), state(3));
    }

    #[test]
    fn stale_packets_are_ignored() {
        let mut book = book(0);
        book.apply_remote(&input_packet(6, |_| 1));
        let update = book.apply_remote(&input_packet(4, |_| 7));
        assert!(!update.advanced);
        assert_eq!(book.remote_input_state(4), state(1));
    }

    #[test]
    fn lost_window_is_filled_with_held_input() {
        let mut book = book(0);
        book.apply_remote(&input_packet(1, |_| 3));
        let update = book.apply_remote(&input_packet(12, |_| 9));
        assert!(update.advanced);
        assert_eq!(update.gap, 6);
        assert_eq!(book.remote_input_state(2), state(3));
        assert_eq!(book.remote_input_state(7), state(3));
        assert_eq!(book.remote_input_state(8), state(9));
    }

    #[test]
    fn packets_beyond_reach_are_rejected() {
        let mut book = InputBook::new(60, 2, 8);
        assert_eq!(book.reach(), 11);

        let update = book.apply_remote(&input_packet(i64::MAX, |_| 1));
        assert!(update.rejected);
        assert!(!update.advanced);
        assert_eq!(book.confirmed_tick(), -1);

        assert!(book.apply_remote(&input_packet(12, |_| 1)).rejected);
        assert!(book.apply_remote(&input_packet(11, |_| 1)).advanced);

        book.set_local_input(0, state(1));
        assert_eq!(book.reach(), 12);
        let update = book.apply_remote(&input_packet(12, |_| 1));
        assert!(update.advanced && !update.rejected);
        assert_eq!(book.confirmed_tick(), 12);
    }

    #[test]
    fn gap_fill_never_exceeds_one_lap() {
        let mut book = InputBook::new(16, 0, 64);
        book.apply_remote(&input_packet(0, |_| 3));
        let update = book.apply_remote(&input_packet(40, |_| 9));
        assert!(update.advanced);
        assert_eq!(update.gap, 16);
        assert_eq!(book.confirmed_tick(), 40);
        for tick in 36..=40 {
            assert_eq!(book.remote_input_state(tick), state(9));
        }
        for tick in 25..36 {
            assert_eq!(book.remote_input_state(tick), state(3));
        }
    }

    #[test]
    fn non_input_packets_leave_book_untouched() {
        let mut book = book(0);
        assert_eq!(book.apply_remote(&Packet::Ping { time: 0 }), RemoteUpdate::default());
        assert_eq!(book.confirmed_tick(), -1);
    }

    /// Packets for ticks `0..count`, reordered inside windows no wider than the
    /// send history and followed by late duplicates.
    fn delivery_order() -> impl Strategy<Value = (usize, Vec<usize>)> {
        (1usize..80).prop_flat_map(|count| {
            let chunks = prop::collection::vec(any::<prop::sample::Index>(), count);
            let dups = prop::collection::vec(any::<prop::sample::Index>(), 0..20);
            (Just(count), chunks, dups).prop_map(|(count, keys, dups)| {
                let mut order: Vec<usize> = (0..count).collect();
                for (chunk, keys) in order
                    .chunks_mut(SEND_HISTORY_SIZE)
                    .zip(keys.chunks(SEND_HISTORY_SIZE))
                {
                    for (i, key) in keys.iter().enumerate().take(chunk.len()) {
                        let j = key.index(chunk.len());
                        chunk.swap(i, j);
                    }
                }
                for dup in dups {
                    order.push(dup.index(count));
                }
                (count, order)
            })
        })
    }

    proptest! {
        #[test]
        fn reordered_and_duplicated_delivery_matches_in_order(
            (count, order) in delivery_order(),
            seed in any::<u32>(),
        ) {
            let source = move |t: i64| (seed.wrapping_mul(t as u32 + 1)) & 0xFFFF;

            let mut in_order = InputBook::new(60, 0, 128);
            for tick in 0..count {
                in_order.apply_remote(&input_packet(tick as i64, source));
            }

            let mut shuffled = InputBook::new(60, 0, 128);
            for &tick in &order {
                let update = shuffled.apply_remote(&input_packet(tick as i64, source));
                prop_assert_eq!(update.gap, 0);
            }

            prop_assert_eq!(shuffled.confirmed_tick(), in_order.confirmed_tick());
            let first = (count as i64 - 60).max(0);
            for tick in first..count as i64 {
                prop_assert_eq!(shuffled.remote_input_state(tick), in_order.remote_input_state(tick));
                prop_assert_eq!(shuffled.remote_input_state(tick), state(source(tick)));
            }
        }
    }
}
