//! Fixed-layout datagram codec.
//!
//! Layout per variant (all integers little-endian):
//! - `Handshake`:   tag
//! - `PlayerInput`: tag, i64 tick_delta, i64 tick, `SEND_HISTORY_SIZE` x u32 inputs
//! - `Ping`/`Pong`: tag, i64 time
//! - `Sync`:        tag, i64 tick, u32 checksum
//!
//! Decoding checks the exact datagram length for the tag before reading any
//! field, so truncated or padded datagrams are rejected instead of misread.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    constants::{SEND_HISTORY_SIZE, TAG_LEN},
    error::ProtoError,
    input::PlayerState,
    packet::{Packet, PacketKind},
};

/// Encode a packet into a freshly allocated datagram.
pub fn encode(packet: &Packet) -> Bytes {
    let mut out = BytesMut::with_capacity(packet.encoded_len());
    out.put_u8(packet.kind() as u8);
    match *packet {
        Packet::Handshake => {}
        Packet::PlayerInput {
            tick_delta,
            tick,
            inputs,
        } => {
            out.put_i64_le(tick_delta);
            out.put_i64_le(tick);
            for state in inputs {
                out.put_u32_le(state.bits());
            }
        }
        Packet::Ping { time } | Packet::Pong { time } => out.put_i64_le(time),
        Packet::Sync { tick, checksum } => {
            out.put_i64_le(tick);
            out.put_u32_le(checksum);
        }
    }
    out.freeze()
}

/// Decode one datagram.
pub fn decode(datagram: &[u8]) -> Result<Packet, ProtoError> {
    let tag = *datagram.first().ok_or(ProtoError::Empty)?;
    let kind = PacketKind::from_repr(tag).ok_or(ProtoError::UnknownTag(tag))?;

    let expected = kind.encoded_len();
    if datagram.len() != expected {
        return Err(ProtoError::LengthMismatch {
            kind: kind.name(),
            expected,
            actual: datagram.len(),
        });
    }

    let body = &datagram[TAG_LEN..];
    let packet = match kind {
        PacketKind::Handshake => Packet::Handshake,
        PacketKind::PlayerInput => {
            let tick_delta = read_i64_le(body, 0)?;
            let tick = read_i64_le(body, 8)?;
            let mut inputs = [PlayerState::NEUTRAL; SEND_HISTORY_SIZE];
            for (i, slot) in inputs.iter_mut().enumerate() {
                *slot = PlayerState::from_wire(read_u32_le(body, 16 + 4 * i)?)?;
            }
            Packet::PlayerInput {
                tick_delta,
                tick,
                inputs,
            }
        }
        PacketKind::Ping => Packet::Ping {
            time: read_i64_le(body, 0)?,
        },
        PacketKind::Pong => Packet::Pong {
            time: read_i64_le(body, 0)?,
        },
        PacketKind::Sync => Packet::Sync {
            tick: read_i64_le(body, 0)?,
            checksum: read_u32_le(body, 8)?,
        },
    };
    Ok(packet)
}

fn read_i64_le(buf: &[u8], start: usize) -> Result<i64, ProtoError> {
    let bytes: [u8; 8] = buf
        .get(start..start + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or(ProtoError::LengthMismatch {
            kind: "field",
            expected: start + 8,
            actual: buf.len(),
        })?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_u32_le(buf: &[u8], start: usize) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = buf
        .get(start..start + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(ProtoError::LengthMismatch {
            kind: "field",
            expected: start + 4,
            actual: buf.len(),
        })?;
    Ok(u32::from_le_bytes(bytes))
}
