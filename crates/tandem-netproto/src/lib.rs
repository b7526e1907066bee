//! Wire protocol for two-peer rollback netplay.
//!
//! Every datagram carries exactly one [`Packet`]: a one-byte tag followed by
//! the variant's fixed-size, little-endian field list. There is no header,
//! no sequence number and no acknowledgement; redundancy is built into the
//! packets themselves (see [`constants::SEND_HISTORY_SIZE`]).

pub mod codec;
pub mod constants;
pub mod error;
pub mod input;
pub mod packet;

pub use codec::{decode, encode};
pub use error::ProtoError;
pub use input::{Button, PlayerState};
pub use packet::{Packet, PacketKind};
