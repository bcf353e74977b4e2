//! GBN Packet Structures and Serialization
//!
//! Every datagram starts with a 6-byte header: a 16-bit transmission ID
//! followed by a 32-bit sequence number, both big-endian. There is no type
//! tag. The packet kind follows from the sequence number: 0 is the header
//! packet, `N-1` is the trailer and everything in between carries data.
//! Acknowledgments reuse the same 6-byte layout with no payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Transmission identifier carried in bytes 0-1 of every packet
pub type TransmissionId = u16;

/// Size of the transmission ID field in bytes
pub const TRANSMISSION_ID_SIZE: usize = 2;

/// Size of the sequence number field in bytes
pub const SEQUENCE_NUMBER_SIZE: usize = 4;

/// Offset of the sequence number field
pub const SEQUENCE_NUMBER_OFFSET: usize = TRANSMISSION_ID_SIZE;

/// Size of the common packet header (ID + sequence number)
pub const HEADER_SIZE: usize = TRANSMISSION_ID_SIZE + SEQUENCE_NUMBER_SIZE;

/// Size of an encoded acknowledgment
pub const ACK_SIZE: usize = HEADER_SIZE;

/// Size of the total-packet-count field at the start of the header payload
pub const TOTAL_PACKETS_SIZE: usize = 4;

/// Default data chunk capacity per packet
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Largest UDP payload over IPv4 (65535 - 8 UDP - 20 IP)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest chunk that still fits a datagram once the header is prepended
pub const MAX_CHUNK_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Packet kind, derived from the sequence number and the transfer length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Sequence 0: total packet count and metadata
    Header,
    /// Sequence 1..N-2: a chunk of the source payload
    Data,
    /// Sequence N-1: digest of the full payload
    Trailer,
}

impl PacketKind {
    /// Classify a sequence number within a transfer of `total_packets`
    pub fn classify(seq: u32, total_packets: u32) -> Self {
        if seq == 0 {
            PacketKind::Header
        } else if total_packets > 0 && seq == total_packets - 1 {
            PacketKind::Trailer
        } else {
            PacketKind::Data
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Header => write!(f, "Header"),
            PacketKind::Data => write!(f, "Data"),
            PacketKind::Trailer => write!(f, "Trailer"),
        }
    }
}

/// A decoded transfer packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Transmission this packet belongs to
    pub transmission_id: TransmissionId,
    /// Sequence number (0 = header, N-1 = trailer)
    pub seq: u32,
    /// Kind-specific payload
    pub payload: Bytes,
}

impl Packet {
    /// Kind of this packet within a transfer of `total_packets`
    pub fn kind(&self, total_packets: u32) -> PacketKind {
        PacketKind::classify(self.seq, total_packets)
    }

    /// Parse a packet from a byte slice, copying the payload
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let (transmission_id, seq) = read_header(bytes)?;
        Ok(Packet {
            transmission_id,
            seq,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }

    /// Parse a packet from an owned buffer without copying the payload
    pub fn decode_bytes(bytes: Bytes) -> Result<Self, PacketError> {
        let (transmission_id, seq) = read_header(&bytes)?;
        Ok(Packet {
            transmission_id,
            seq,
            payload: bytes.slice(HEADER_SIZE..),
        })
    }
}

/// Contents of the header packet (sequence 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Number of packets in the transfer, header and trailer included
    pub total_packets: u32,
    /// Free-form metadata, by convention the UTF-8 file name
    pub metadata: Bytes,
}

impl HeaderInfo {
    /// Parse a header packet payload
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < TOTAL_PACKETS_SIZE {
            return Err(PacketError::Malformed {
                expected: HEADER_SIZE + TOTAL_PACKETS_SIZE,
                actual: HEADER_SIZE + payload.len(),
            });
        }

        let mut buf = payload;
        let total_packets = buf.get_u32();
        Ok(HeaderInfo {
            total_packets,
            metadata: Bytes::copy_from_slice(buf),
        })
    }

    /// Metadata interpreted as a file name, if it is valid non-empty UTF-8
    pub fn file_name(&self) -> Option<&str> {
        std::str::from_utf8(&self.metadata)
            .ok()
            .filter(|name| !name.is_empty())
    }
}

/// Cumulative acknowledgment: every packet up to and including `seq` is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub transmission_id: TransmissionId,
    pub seq: u32,
}

impl Ack {
    /// Create a new acknowledgment
    pub fn new(transmission_id: TransmissionId, seq: u32) -> Self {
        Ack {
            transmission_id,
            seq,
        }
    }

    /// Serialize to the fixed 6-byte wire form
    pub fn to_bytes(self) -> Bytes {
        encode_ack(self.transmission_id, self.seq)
    }

    /// Parse an acknowledgment; any bytes past the header are ignored
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let (transmission_id, seq) = read_header(bytes)?;
        Ok(Ack {
            transmission_id,
            seq,
        })
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ACK({:#06x}, {})", self.transmission_id, self.seq)
    }
}

/// Encode the header packet (sequence 0)
pub fn encode_header(transmission_id: TransmissionId, total_packets: u32, metadata: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + TOTAL_PACKETS_SIZE + metadata.len());
    put_header(&mut buf, transmission_id, 0);
    buf.put_u32(total_packets);
    buf.put_slice(metadata);
    buf.freeze()
}

/// Encode a data packet
pub fn encode_data(transmission_id: TransmissionId, seq: u32, chunk: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + chunk.len());
    put_header(&mut buf, transmission_id, seq);
    buf.put_slice(chunk);
    buf.freeze()
}

/// Encode the trailer packet carrying the payload digest
pub fn encode_trailer(transmission_id: TransmissionId, seq: u32, digest: &[u8]) -> Bytes {
    encode_data(transmission_id, seq, digest)
}

/// Encode an acknowledgment (always [`ACK_SIZE`] bytes)
pub fn encode_ack(transmission_id: TransmissionId, seq: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(ACK_SIZE);
    put_header(&mut buf, transmission_id, seq);
    buf.freeze()
}

/// Number of packets needed to carry `payload_len` bytes in `chunk_size` chunks
///
/// One header and one trailer packet are always added.
pub fn packet_count(payload_len: usize, chunk_size: usize) -> usize {
    (payload_len + chunk_size - 1) / chunk_size + 2
}

#[inline]
fn put_header(buf: &mut BytesMut, transmission_id: TransmissionId, seq: u32) {
    buf.put_u16(transmission_id);
    buf.put_u32(seq);
}

fn read_header(bytes: &[u8]) -> Result<(TransmissionId, u32), PacketError> {
    if bytes.len() < HEADER_SIZE {
        return Err(PacketError::Malformed {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let mut buf = &bytes[..HEADER_SIZE];
    Ok((buf.get_u16(), buf.get_u32()))
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Malformed packet: expected at least {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = encode_header(0x0001, 2100, b"1mb.txt");

        assert_eq!(&bytes[..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..6], &[0, 0, 0, 0]);
        assert_eq!(&bytes[6..10], &2100u32.to_be_bytes());
        assert_eq!(&bytes[10..], b"1mb.txt");

        let packet = Packet::decode(&bytes).unwrap();
        assert_eq!(packet.kind(2100), PacketKind::Header);

        let info = HeaderInfo::parse(&packet.payload).unwrap();
        assert_eq!(info.total_packets, 2100);
        assert_eq!(info.file_name(), Some("1mb.txt"));
    }

    #[test]
    fn test_data_layout() {
        let bytes = encode_data(0xABCD, 0x0102_0304, b"chunk");

        assert_eq!(&bytes[..6], &[0xAB, 0xCD, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[6..], b"chunk");

        let packet = Packet::decode_bytes(bytes).unwrap();
        assert_eq!(packet.transmission_id, 0xABCD);
        assert_eq!(packet.seq, 0x0102_0304);
        assert_eq!(&packet.payload[..], b"chunk");
    }

    #[test]
    fn test_trailer_kind() {
        let digest = [7u8; 16];
        let bytes = encode_trailer(1, 9, &digest);
        let packet = Packet::decode(&bytes).unwrap();

        assert_eq!(packet.kind(10), PacketKind::Trailer);
        assert_eq!(packet.kind(11), PacketKind::Data);
        assert_eq!(&packet.payload[..], &digest);
    }

    #[test]
    fn test_ack_is_six_bytes() {
        let bytes = encode_ack(1, 59);
        assert_eq!(bytes.len(), ACK_SIZE);

        let ack = Ack::decode(&bytes).unwrap();
        assert_eq!(ack, Ack::new(1, 59));
        assert_eq!(ack.to_bytes(), bytes);
    }

    #[test]
    fn test_short_packets_are_malformed() {
        for len in 0..HEADER_SIZE {
            let bytes = vec![0u8; len];
            assert_eq!(
                Packet::decode(&bytes),
                Err(PacketError::Malformed {
                    expected: HEADER_SIZE,
                    actual: len
                })
            );
            assert!(Ack::decode(&bytes).is_err());
        }

        // Exactly the header is a valid, empty packet
        assert!(Packet::decode(&[0u8; HEADER_SIZE]).unwrap().payload.is_empty());
    }

    #[test]
    fn test_header_payload_too_short() {
        assert!(matches!(
            HeaderInfo::parse(&[0, 0, 1]),
            Err(PacketError::Malformed { .. })
        ));

        let info = HeaderInfo::parse(&[0, 0, 0, 2]).unwrap();
        assert_eq!(info.total_packets, 2);
        assert_eq!(info.file_name(), None);
    }

    #[test]
    fn test_packet_count() {
        assert_eq!(packet_count(1_048_576, 500), 2100);
        assert_eq!(packet_count(1000, 500), 4);
        assert_eq!(packet_count(1001, 500), 5);
        assert_eq!(packet_count(0, 500), 2);
    }

    #[test]
    fn test_classify() {
        assert_eq!(PacketKind::classify(0, 2), PacketKind::Header);
        assert_eq!(PacketKind::classify(1, 2), PacketKind::Trailer);
        assert_eq!(PacketKind::classify(1, 3), PacketKind::Data);
        assert_eq!(PacketKind::classify(5, 0), PacketKind::Data);
    }
}
