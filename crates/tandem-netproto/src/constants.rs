/// Number of simulation participants. The protocol is strictly point-to-point.
pub const PLAYER_COUNT: usize = 2;

/// Number of consecutive ticks of local input carried by every `PlayerInput`.
///
/// A single lost datagram is healed by the next one, which repeats the
/// previous `SEND_HISTORY_SIZE - 1` ticks.
pub const SEND_HISTORY_SIZE: usize = 5;

/// Tag byte length.
pub const TAG_LEN: usize = 1;

/// Encoded sizes per variant (tag included).
pub const HANDSHAKE_LEN: usize = TAG_LEN;
pub const PLAYER_INPUT_LEN: usize = TAG_LEN + 8 + 8 + 4 * SEND_HISTORY_SIZE;
pub const PING_LEN: usize = TAG_LEN + 8;
pub const PONG_LEN: usize = TAG_LEN + 8;
pub const SYNC_LEN: usize = TAG_LEN + 8 + 4;

/// Largest datagram the protocol ever produces.
///
/// Receivers size their buffers from this; anything longer is malformed.
pub const MAX_DATAGRAM_LEN: usize = PLAYER_INPUT_LEN;
