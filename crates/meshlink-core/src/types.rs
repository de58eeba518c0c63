//! Core types for the meshlink stack
//!
//! Addresses in the stack are truncated SHA-256 hashes. Each kind of address
//! gets its own newtype so a link id can never be passed where a destination
//! hash is expected.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::MeshError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Length of truncated hashes in bits
pub const TRUNCATED_HASH_LENGTH: usize = 128;

/// Length of truncated hashes in bytes
pub const TRUNCATED_HASH_BYTES: usize = TRUNCATED_HASH_LENGTH / 8;

/// Full SHA-256 digest of the given data
pub fn full_hash<T: AsRef<[u8]>>(data: T) -> [u8; 32] {
    let digest = Sha256::digest(data.as_ref());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 digest truncated to [`TRUNCATED_HASH_BYTES`]
pub fn truncated_hash<T: AsRef<[u8]>>(data: T) -> [u8; TRUNCATED_HASH_BYTES] {
    let full = full_hash(data);
    let mut out = [0u8; TRUNCATED_HASH_BYTES];
    out.copy_from_slice(&full[..TRUNCATED_HASH_BYTES]);
    out
}

// ----------------------------------------------------------------------------
// Truncated Hash Newtypes
// ----------------------------------------------------------------------------

macro_rules! truncated_hash_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; TRUNCATED_HASH_BYTES]);

        impl $name {
            /// Wrap raw hash bytes
            pub const fn new(bytes: [u8; TRUNCATED_HASH_BYTES]) -> Self {
                Self(bytes)
            }

            /// Build from a slice that must be exactly one truncated hash long
            pub fn from_slice(bytes: &[u8]) -> Result<Self, MeshError> {
                let array: [u8; TRUNCATED_HASH_BYTES] = bytes.try_into().map_err(|_| {
                    MeshError::InvalidHash(format!(
                        "{} must be {} bytes, got {}",
                        $label,
                        TRUNCATED_HASH_BYTES,
                        bytes.len()
                    ))
                })?;
                Ok(Self(array))
            }

            /// Parse from a hexadecimal string of exactly `2 * TRUNCATED_HASH_BYTES` characters
            pub fn from_hex(text: &str) -> Result<Self, MeshError> {
                let expected = TRUNCATED_HASH_BYTES * 2;
                if text.len() != expected {
                    return Err(MeshError::InvalidHash(format!(
                        "{} length is invalid, must be {} hexadecimal characters ({} bytes).",
                        $label, expected, TRUNCATED_HASH_BYTES
                    )));
                }
                let bytes = hex::decode(text).map_err(|e| {
                    MeshError::InvalidHash(format!("{} is not valid hexadecimal: {}", $label, e))
                })?;
                Self::from_slice(&bytes)
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; TRUNCATED_HASH_BYTES] {
                &self.0
            }

            /// Plain lowercase hex without decoration
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        /// Pretty representation: `<hex>`
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "<{}>", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = MeshError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim().trim_start_matches('<').trim_end_matches('>');
                Self::from_hex(trimmed)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

truncated_hash_type!(
    /// Address of a destination: hash of its name hash and owning identity
    DestinationHash,
    "Destination"
);

truncated_hash_type!(
    /// Hash of an identity's public keys
    IdentityHash,
    "Identity hash"
);

truncated_hash_type!(
    /// Identifier of an established or pending link
    LinkId,
    "Link id"
);

truncated_hash_type!(
    /// Hash identifying a single packet, used for proofs and duplicate suppression
    PacketHash,
    "Packet hash"
);

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Duration since another timestamp, zero if `other` is later
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_hash_display_is_pretty_hex() {
        let hash = DestinationHash::new([0xab; TRUNCATED_HASH_BYTES]);
        assert_eq!(hash.to_string(), format!("<{}>", "ab".repeat(16)));
        assert_eq!(hash.to_hex(), "ab".repeat(16));
    }

    #[test]
    fn test_from_hex_requires_exact_length() {
        let err = DestinationHash::from_hex("abcd").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("32 hexadecimal characters"));
        assert!(message.contains("16 bytes"));

        assert!(DestinationHash::from_hex(&"0".repeat(34)).is_err());
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let text = "zz".repeat(16);
        assert!(DestinationHash::from_hex(&text).is_err());
    }

    #[test]
    fn test_from_str_accepts_pretty_form() {
        let hash = LinkId::new([7u8; TRUNCATED_HASH_BYTES]);
        let parsed: LinkId = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_truncated_hash_is_prefix_of_full_hash() {
        let full = full_hash(b"meshlink");
        let truncated = truncated_hash(b"meshlink");
        assert_eq!(&full[..TRUNCATED_HASH_BYTES], &truncated[..]);
    }

    #[test]
    fn test_timestamp_duration_saturates() {
        let early = Timestamp::new(1_000);
        let late = Timestamp::new(3_500);
        assert_eq!(late.duration_since(early).as_millis(), 2_500);
        assert_eq!(early.duration_since(late).as_millis(), 0);
        assert_eq!(late.as_secs(), 3);
    }
}
