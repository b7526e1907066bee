use strum::FromRepr;

use crate::{
    constants::{HANDSHAKE_LEN, PING_LEN, PLAYER_INPUT_LEN, PONG_LEN, SEND_HISTORY_SIZE, SYNC_LEN},
    input::PlayerState,
};

/// Tag byte identifying a packet variant on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, strum::IntoStaticStr)]
pub enum PacketKind {
    Handshake = 1,
    PlayerInput = 2,
    Ping = 3,
    Pong = 4,
    Sync = 5,
}

impl PacketKind {
    /// Exact encoded length of this variant, tag included.
    pub const fn encoded_len(self) -> usize {
        match self {
            Self::Handshake => HANDSHAKE_LEN,
            Self::PlayerInput => PLAYER_INPUT_LEN,
            Self::Ping => PING_LEN,
            Self::Pong => PONG_LEN,
            Self::Sync => SYNC_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A single protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// Session opening. Sent several times in a row; carries no fields.
    Handshake,
    /// The sender's most recent local input.
    ///
    /// `inputs[SEND_HISTORY_SIZE - 1]` is the input for `tick`, and
    /// `inputs[i]` the input for `tick - (SEND_HISTORY_SIZE - 1 - i)`.
    PlayerInput {
        /// Sender's `LocalTick - ConfirmedTick` at send time.
        tick_delta: i64,
        /// Newest tick carried.
        tick: i64,
        inputs: [PlayerState; SEND_HISTORY_SIZE],
    },
    /// Latency probe; `time` is the sender's unix time in milliseconds.
    Ping { time: i64 },
    /// Echo of a `Ping`'s `time`.
    Pong { time: i64 },
    /// State checksum at a synced tick.
    Sync { tick: i64, checksum: u32 },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Handshake => PacketKind::Handshake,
            Self::PlayerInput { .. } => PacketKind::PlayerInput,
            Self::Ping { .. } => PacketKind::Ping,
            Self::Pong { .. } => PacketKind::Pong,
            Self::Sync { .. } => PacketKind::Sync,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.kind().encoded_len()
    }

    /// Iterate `(tick, state)` pairs carried by a `PlayerInput`, oldest first.
    ///
    /// Ticks before 0 are skipped: they precede the session start and only
    /// ever carry neutral padding.
    pub fn input_ticks(&self) -> impl Iterator<Item = (i64, PlayerState)> + '_ {
        let (tick, inputs): (i64, &[PlayerState]) = match self {
            Self::PlayerInput { tick, inputs, .. } => (*tick, inputs),
            _ => (0, &[]),
        };
        let oldest = tick - (inputs.len() as i64 - 1);
        inputs
            .iter()
            .enumerate()
            .map(move |(i, state)| (oldest + i as i64, *state))
            .filter(|(tick, _)| *tick >= 0)
    }
}
