//! Packet format and binary wire encoding
//!
//! ```text
//! +---------+------+---------+------+------------------+-----------+
//! | version | type | context | hops | address (16)     | payload   |
//! +---------+------+---------+------+------------------+-----------+
//! ```
//!
//! The address is a destination hash, a link id or (for proofs) a packet
//! hash, depending on the packet type.

use core::fmt;

use crate::types::{
    truncated_hash, DestinationHash, LinkId, PacketHash, TRUNCATED_HASH_BYTES,
};
use crate::{MeshError, Result};

// ----------------------------------------------------------------------------
// Protocol Constants
// ----------------------------------------------------------------------------

/// Wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum size of an encoded packet
pub const MTU: usize = 500;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 4;

/// Size of the address field
pub const ADDRESS_SIZE: usize = TRUNCATED_HASH_BYTES;

/// Largest payload that fits in one packet
pub const MAX_PAYLOAD_SIZE: usize = MTU - HEADER_SIZE - ADDRESS_SIZE;

/// Hop counts beyond this are dropped
pub const MAX_HOPS: u8 = 128;

// ----------------------------------------------------------------------------
// Packet Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Signed presence broadcast for a destination
    Announce = 0x01,
    /// Sealed data addressed to a single destination
    Data = 0x02,
    /// First Noise message of a link handshake
    LinkRequest = 0x03,
    /// Responder's Noise reply plus signature
    LinkProof = 0x04,
    /// Encrypted data over an established link
    LinkData = 0x05,
    /// Authenticated link teardown
    LinkClose = 0x06,
    /// Encrypted keep-alive over an idle link
    KeepAlive = 0x07,
    /// Request for an announce of a destination
    PathRequest = 0x08,
    /// Signed delivery proof for a data packet
    Proof = 0x09,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(PacketType::Announce),
            0x02 => Ok(PacketType::Data),
            0x03 => Ok(PacketType::LinkRequest),
            0x04 => Ok(PacketType::LinkProof),
            0x05 => Ok(PacketType::LinkData),
            0x06 => Ok(PacketType::LinkClose),
            0x07 => Ok(PacketType::KeepAlive),
            0x08 => Ok(PacketType::PathRequest),
            0x09 => Ok(PacketType::Proof),
            other => Err(MeshError::invalid_packet(format!(
                "Unknown packet type 0x{:02x}",
                other
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the address field carries a link id
    pub fn is_link_scoped(self) -> bool {
        matches!(
            self,
            PacketType::LinkProof
                | PacketType::LinkData
                | PacketType::LinkClose
                | PacketType::KeepAlive
        )
    }
}

/// Extra qualifier for a packet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketContext {
    None = 0x00,
    /// Announce sent in answer to a path request
    PathResponse = 0x01,
}

impl PacketContext {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(PacketContext::None),
            0x01 => Ok(PacketContext::PathResponse),
            other => Err(MeshError::invalid_packet(format!(
                "Unknown packet context 0x{:02x}",
                other
            ))),
        }
    }
}

// ----------------------------------------------------------------------------
// Packet
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub context: PacketContext,
    pub hops: u8,
    pub address: [u8; ADDRESS_SIZE],
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, address: [u8; ADDRESS_SIZE], payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MeshError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            packet_type,
            context: PacketContext::None,
            hops: 0,
            address,
            payload,
        })
    }

    pub fn with_context(mut self, context: PacketContext) -> Self {
        self.context = context;
        self
    }

    pub fn destination_hash(&self) -> DestinationHash {
        DestinationHash::new(self.address)
    }

    pub fn link_id(&self) -> LinkId {
        LinkId::new(self.address)
    }

    /// Hash over type, address and payload; hop count is excluded so the
    /// hash is stable as a packet travels
    pub fn hash(&self) -> PacketHash {
        let mut material = Vec::with_capacity(1 + ADDRESS_SIZE + self.payload.len());
        material.push(self.packet_type.as_u8());
        material.extend_from_slice(&self.address);
        material.extend_from_slice(&self.payload);
        PacketHash::new(truncated_hash(material))
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + ADDRESS_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.push(PROTOCOL_VERSION);
        bytes.push(self.packet_type.as_u8());
        bytes.push(self.context as u8);
        bytes.push(self.hops);
        bytes.extend_from_slice(&self.address);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE + ADDRESS_SIZE {
            return Err(MeshError::invalid_packet(format!(
                "Packet too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes.len() > MTU {
            return Err(MeshError::invalid_packet(format!(
                "Packet exceeds MTU: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != PROTOCOL_VERSION {
            return Err(MeshError::invalid_packet(format!(
                "Unsupported protocol version {}",
                bytes[0]
            )));
        }

        let packet_type = PacketType::from_u8(bytes[1])?;
        let context = PacketContext::from_u8(bytes[2])?;
        let hops = bytes[3];
        if hops > MAX_HOPS {
            return Err(MeshError::invalid_packet("Hop limit exceeded"));
        }

        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&bytes[HEADER_SIZE..HEADER_SIZE + ADDRESS_SIZE]);

        Ok(Self {
            packet_type,
            context,
            hops,
            address,
            payload: bytes[HEADER_SIZE + ADDRESS_SIZE..].to_vec(),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn data_packet() -> Packet {
        Packet::new(PacketType::Data, [3u8; ADDRESS_SIZE], b"hello".to_vec()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let packet = data_packet().with_context(PacketContext::PathResponse);
        let bytes = packet.encode();

        assert_eq!(bytes.len(), HEADER_SIZE + ADDRESS_SIZE + 5);
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], PacketType::Data as u8);
        assert_eq!(bytes[2], PacketContext::PathResponse as u8);
        assert_eq!(bytes[3], 0);
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + ADDRESS_SIZE], &[3u8; ADDRESS_SIZE]);
        assert_eq!(&bytes[HEADER_SIZE + ADDRESS_SIZE..], b"hello");

        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_payload_limit() {
        let max = vec![0u8; MAX_PAYLOAD_SIZE];
        let packet = Packet::new(PacketType::Data, [0u8; ADDRESS_SIZE], max).unwrap();
        assert_eq!(packet.encoded_len(), MTU);

        let too_big = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = Packet::new(PacketType::Data, [0u8; ADDRESS_SIZE], too_big).unwrap_err();
        assert!(matches!(err, MeshError::PayloadTooLarge { max: MAX_PAYLOAD_SIZE, .. }));
    }

    #[test]
    fn test_hash_ignores_hops() {
        let packet = data_packet();
        let mut forwarded = packet.clone();
        forwarded.hops = 3;
        assert_eq!(packet.hash(), forwarded.hash());

        let other = Packet::new(PacketType::Data, [3u8; ADDRESS_SIZE], b"hellp".to_vec()).unwrap();
        assert_ne!(packet.hash(), other.hash());
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(Packet::decode(&[]).is_err());
        assert!(Packet::decode(&[PROTOCOL_VERSION, 0x02, 0, 0]).is_err());

        let mut bytes = data_packet().encode();
        bytes[0] = 9;
        assert!(Packet::decode(&bytes).is_err());

        let mut bytes = data_packet().encode();
        bytes[1] = 0x7f;
        assert!(Packet::decode(&bytes).is_err());

        let mut bytes = data_packet().encode();
        bytes[3] = MAX_HOPS + 1;
        assert!(Packet::decode(&bytes).is_err());

        let oversized = vec![PROTOCOL_VERSION; MTU + 1];
        assert!(Packet::decode(&oversized).is_err());
    }

    #[test]
    fn test_link_scoped_types() {
        assert!(PacketType::LinkData.is_link_scoped());
        assert!(PacketType::KeepAlive.is_link_scoped());
        assert!(!PacketType::LinkRequest.is_link_scoped());
        assert!(!PacketType::Announce.is_link_scoped());
    }

    #[test]
    fn test_display_is_packet_hash() {
        let packet = data_packet();
        assert_eq!(packet.to_string(), packet.hash().to_string());
    }
}
