//! Wire framing for the connection: a 12-byte base header plus head and
//! body byte runs.

mod error;
mod packet;

pub use error::Error;
pub use packet::{Packet, PacketKind, MAX_PACKET_BODY, MAX_PACKET_HEAD, PACKET_BASE_SIZE};
