//! The wire frame: a 12-byte base header followed by head and body byte
//! runs. `head` carries [`shroud_value`] metadata; `body` is opaque
//! payload (ciphertext for `Message` packets, empty for `Heartbeat`).

use std::io::{self, Read, Write};

use crate::error::Error;

/// Maximum encoded length of the `head` run.
pub const MAX_PACKET_HEAD: usize = 2048;
/// Maximum encoded length of the `body` run.
pub const MAX_PACKET_BODY: usize = 65536;
/// Size of the fixed `[kind][head_len][body_len]` prefix.
pub const PACKET_BASE_SIZE: usize = 12;

/// The three kinds of traffic that flow over the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    Heartbeat,
    Request,
    Message,
}

impl PacketKind {
    fn as_u32(self) -> u32 {
        match self {
            PacketKind::Heartbeat => 0,
            PacketKind::Request => 1,
            PacketKind::Message => 2,
        }
    }

    fn from_u32(v: u32) -> Result<Self, Error> {
        match v {
            0 => Ok(PacketKind::Heartbeat),
            1 => Ok(PacketKind::Request),
            2 => Ok(PacketKind::Message),
            other => Err(Error::UnknownKind(other)),
        }
    }
}

/// A single framed unit of the wire protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub head: Vec<u8>,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketKind, head: Vec<u8>, body: Vec<u8>) -> Result<Self, Error> {
        if head.len() > MAX_PACKET_HEAD {
            return Err(Error::HeadTooLarge(head.len()));
        }
        if body.len() > MAX_PACKET_BODY {
            return Err(Error::BodyTooLarge(body.len()));
        }
        Ok(Packet { kind, head, body })
    }

    pub fn heartbeat() -> Self {
        Packet { kind: PacketKind::Heartbeat, head: Vec::new(), body: Vec::new() }
    }

    /// Serializes the full frame: base header plus head and body bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PACKET_BASE_SIZE + self.head.len() + self.body.len());
        buf.extend_from_slice(&self.kind.as_u32().to_le_bytes());
        buf.extend_from_slice(&(self.head.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.head);
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Parses a single frame from the front of `bytes`, returning the
    /// packet and the number of bytes consumed.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), Error> {
        if bytes.len() < PACKET_BASE_SIZE {
            return Err(Error::Truncated);
        }
        let kind = PacketKind::from_u32(u32::from_le_bytes(bytes[0..4].try_into().unwrap()))?;
        let head_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let body_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        if head_len > MAX_PACKET_HEAD {
            tracing::warn!(head_len, "rejecting frame with oversized head");
            return Err(Error::HeadTooLarge(head_len));
        }
        if body_len > MAX_PACKET_BODY {
            tracing::warn!(body_len, "rejecting frame with oversized body");
            return Err(Error::BodyTooLarge(body_len));
        }
        let total = PACKET_BASE_SIZE + head_len + body_len;
        if bytes.len() < total {
            return Err(Error::Truncated);
        }
        let head = bytes[PACKET_BASE_SIZE..PACKET_BASE_SIZE + head_len].to_vec();
        let body = bytes[PACKET_BASE_SIZE + head_len..total].to_vec();
        Ok((Packet { kind, head, body }, total))
    }

    /// Writes the whole frame to `w`, or fails without partial effect
    /// being observable to the caller (the underlying writer may still
    /// have buffered a prefix on I/O error, but the call reports failure
    /// either way).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.serialize())
    }

    /// Reads exactly one frame from `r`, rejecting oversized head/body
    /// lengths before allocating for them.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        let mut base = [0u8; PACKET_BASE_SIZE];
        r.read_exact(&mut base).map_err(Error::Io)?;
        let kind = PacketKind::from_u32(u32::from_le_bytes(base[0..4].try_into().unwrap()))?;
        let head_len = u32::from_le_bytes(base[4..8].try_into().unwrap()) as usize;
        let body_len = u32::from_le_bytes(base[8..12].try_into().unwrap()) as usize;
        if head_len > MAX_PACKET_HEAD {
            tracing::warn!(head_len, "rejecting inbound frame with oversized head");
            return Err(Error::HeadTooLarge(head_len));
        }
        if body_len > MAX_PACKET_BODY {
            tracing::warn!(body_len, "rejecting inbound frame with oversized body");
            return Err(Error::BodyTooLarge(body_len));
        }
        let mut head = vec![0u8; head_len];
        r.read_exact(&mut head).map_err(Error::Io)?;
        let mut body = vec![0u8; body_len];
        r.read_exact(&mut body).map_err(Error::Io)?;
        Ok(Packet { kind, head, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty_heartbeat() {
        let p = Packet::heartbeat();
        let bytes = p.serialize();
        assert_eq!(bytes.len(), PACKET_BASE_SIZE);
        let (parsed, consumed) = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed, p);
        assert_eq!(consumed, PACKET_BASE_SIZE);
    }

    #[test]
    fn roundtrip_with_head_and_body() {
        let p = Packet::new(PacketKind::Message, vec![1, 2, 3], vec![9; 4096]).unwrap();
        let bytes = p.serialize();
        assert_eq!(bytes.len(), PACKET_BASE_SIZE + 3 + 4096);
        let (parsed, consumed) = Packet::parse(&bytes).unwrap();
        assert_eq!(parsed, p);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn rejects_oversized_head() {
        let head = vec![0u8; MAX_PACKET_HEAD + 1];
        assert!(matches!(
            Packet::new(PacketKind::Request, head, vec![]),
            Err(Error::HeadTooLarge(_))
        ));
    }

    #[test]
    fn rejects_oversized_body() {
        let body = vec![0u8; MAX_PACKET_BODY + 1];
        assert!(matches!(
            Packet::new(PacketKind::Message, vec![], body),
            Err(Error::BodyTooLarge(_))
        ));
    }

    #[test]
    fn parse_truncated_frame_fails() {
        let p = Packet::new(PacketKind::Request, vec![1, 2], vec![3, 4, 5]).unwrap();
        let bytes = p.serialize();
        assert!(matches!(Packet::parse(&bytes[..bytes.len() - 1]), Err(Error::Truncated)));
    }

    #[test]
    fn read_from_stream() {
        let p = Packet::new(PacketKind::Message, vec![1], vec![2; 100]).unwrap();
        let bytes = p.serialize();
        let mut cursor = std::io::Cursor::new(bytes);
        let parsed = Packet::read_from(&mut cursor).unwrap();
        assert_eq!(parsed, p);
    }
}
