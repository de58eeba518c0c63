//! Identities and the store of identities learned from announces
//!
//! A [`PrivateIdentity`] bundles an X25519 static key (used for encryption and
//! link handshakes) with an Ed25519 signing key. Its public half is an
//! [`Identity`], addressed by the truncated hash of both public keys.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{SigningKeyPair, StaticKeyPair, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::types::{truncated_hash, DestinationHash, IdentityHash, Timestamp};
use crate::{MeshError, Result};

/// Length of the serialized public keys of an identity
pub const IDENTITY_PUBLIC_SIZE: usize = PUBLIC_KEY_SIZE * 2;

/// Length of a persisted private identity
pub const IDENTITY_PRIVATE_SIZE: usize = 64;

// ----------------------------------------------------------------------------
// Public Identity
// ----------------------------------------------------------------------------

/// Public keys of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    encryption_key: [u8; 32],
    signing_key: [u8; 32],
    hash: IdentityHash,
}

impl Identity {
    pub fn new(encryption_key: [u8; 32], signing_key: [u8; 32]) -> Self {
        let mut material = [0u8; IDENTITY_PUBLIC_SIZE];
        material[..32].copy_from_slice(&encryption_key);
        material[32..].copy_from_slice(&signing_key);

        Self {
            encryption_key,
            signing_key,
            hash: IdentityHash::new(truncated_hash(material)),
        }
    }

    /// Parse `encryption_key || signing_key`
    pub fn from_public_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != IDENTITY_PUBLIC_SIZE {
            return Err(MeshError::InvalidIdentity(format!(
                "public key material must be {} bytes, got {}",
                IDENTITY_PUBLIC_SIZE,
                bytes.len()
            )));
        }
        let mut encryption_key = [0u8; 32];
        let mut signing_key = [0u8; 32];
        encryption_key.copy_from_slice(&bytes[..32]);
        signing_key.copy_from_slice(&bytes[32..]);
        Ok(Self::new(encryption_key, signing_key))
    }

    pub fn public_bytes(&self) -> [u8; IDENTITY_PUBLIC_SIZE] {
        let mut out = [0u8; IDENTITY_PUBLIC_SIZE];
        out[..32].copy_from_slice(&self.encryption_key);
        out[32..].copy_from_slice(&self.signing_key);
        out
    }

    pub fn hash(&self) -> IdentityHash {
        self.hash
    }

    /// X25519 public key
    pub fn encryption_key(&self) -> &[u8; 32] {
        &self.encryption_key
    }

    /// Ed25519 public key
    pub fn signing_key(&self) -> &[u8; 32] {
        &self.signing_key
    }

    pub fn verify(&self, data: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Result<()> {
        SigningKeyPair::verify(&self.signing_key, data, signature)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}

// ----------------------------------------------------------------------------
// Private Identity
// ----------------------------------------------------------------------------

/// Identity holding private keys, able to sign and to accept links
#[derive(Debug, Clone)]
pub struct PrivateIdentity {
    static_keys: StaticKeyPair,
    signing_keys: SigningKeyPair,
    public: Identity,
}

impl PrivateIdentity {
    /// Create a new random identity
    pub fn generate() -> Self {
        Self::from_parts(StaticKeyPair::generate(), SigningKeyPair::generate())
    }

    fn from_parts(static_keys: StaticKeyPair, signing_keys: SigningKeyPair) -> Self {
        let public = Identity::new(static_keys.public_key_bytes(), signing_keys.public_key_bytes());
        Self {
            static_keys,
            signing_keys,
            public,
        }
    }

    /// Restore from `x25519_private || ed25519_private`
    pub fn from_private_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != IDENTITY_PRIVATE_SIZE {
            return Err(MeshError::InvalidIdentity(format!(
                "private key material must be {} bytes, got {}",
                IDENTITY_PRIVATE_SIZE,
                bytes.len()
            )));
        }
        let mut static_bytes = [0u8; 32];
        let mut signing_bytes = [0u8; 32];
        static_bytes.copy_from_slice(&bytes[..32]);
        signing_bytes.copy_from_slice(&bytes[32..]);

        Ok(Self::from_parts(
            StaticKeyPair::from_bytes(&static_bytes),
            SigningKeyPair::from_bytes(&signing_bytes),
        ))
    }

    pub fn to_private_bytes(&self) -> [u8; IDENTITY_PRIVATE_SIZE] {
        let mut out = [0u8; IDENTITY_PRIVATE_SIZE];
        out[..32].copy_from_slice(&self.static_keys.private_key_bytes());
        out[32..].copy_from_slice(&self.signing_keys.private_key_bytes());
        out
    }

    /// Load an identity previously written with [`PrivateIdentity::to_file`]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let identity = Self::from_private_bytes(&bytes)?;
        debug!(
            "Loaded identity {} from {}",
            identity.public,
            path.as_ref().display()
        );
        Ok(identity)
    }

    /// Persist the private keys to `path`, readable by the owner only
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path.as_ref())?;
        // Owner read/write only, also for a file that already existed
        #[cfg(unix)]
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(&self.to_private_bytes())?;
        Ok(())
    }

    pub fn identity(&self) -> &Identity {
        &self.public
    }

    pub fn hash(&self) -> IdentityHash {
        self.public.hash()
    }

    pub fn static_keys(&self) -> &StaticKeyPair {
        &self.static_keys
    }

    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_keys.sign(data)
    }
}

impl fmt::Display for PrivateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.public.fmt(f)
    }
}

// ----------------------------------------------------------------------------
// Known Destinations
// ----------------------------------------------------------------------------

/// Identity and application data learned from a validated announce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDestination {
    pub identity: Identity,
    pub app_data: Vec<u8>,
    pub last_heard: Timestamp,
}

/// Destination hash to identity mapping, persisted across runs
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KnownDestinations {
    entries: HashMap<DestinationHash, KnownDestination>,
}

impl KnownDestinations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, destination: DestinationHash, identity: Identity, app_data: Vec<u8>) {
        self.entries.insert(
            destination,
            KnownDestination {
                identity,
                app_data,
                last_heard: Timestamp::now(),
            },
        );
    }

    /// Identity that announced `destination`, if any announce was heard
    pub fn recall(&self, destination: &DestinationHash) -> Option<Identity> {
        self.entries.get(destination).map(|entry| entry.identity)
    }

    pub fn recall_app_data(&self, destination: &DestinationHash) -> Option<&[u8]> {
        self.entries
            .get(destination)
            .map(|entry| entry.app_data.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load from `path`; a missing file yields an empty store
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        match std::fs::read(path.as_ref()) {
            Ok(bytes) => Ok(bincode::deserialize(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(MeshError::Io(e)),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self)?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_hash_depends_on_both_keys() {
        let a = Identity::new([1u8; 32], [2u8; 32]);
        let b = Identity::new([1u8; 32], [3u8; 32]);
        let c = Identity::new([1u8; 32], [2u8; 32]);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), c.hash());
    }

    #[test]
    fn test_identity_public_bytes_roundtrip() {
        let private = PrivateIdentity::generate();
        let public = private.identity();
        let restored = Identity::from_public_bytes(&public.public_bytes()).unwrap();
        assert_eq!(&restored, public);
        assert!(Identity::from_public_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_private_identity_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity_file");

        let identity = PrivateIdentity::generate();
        identity.to_file(&path).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len(), IDENTITY_PRIVATE_SIZE);

        let loaded = PrivateIdentity::from_file(&path).unwrap();
        assert_eq!(loaded.identity(), identity.identity());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh");
        PrivateIdentity::generate().to_file(&fresh).unwrap();
        assert_eq!(std::fs::metadata(&fresh).unwrap().permissions().mode() & 0o777, 0o600);

        let existing = dir.path().join("existing");
        std::fs::write(&existing, b"old").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o644)).unwrap();
        PrivateIdentity::generate().to_file(&existing).unwrap();
        assert_eq!(std::fs::metadata(&existing).unwrap().permissions().mode() & 0o777, 0o600);
        assert_eq!(std::fs::read(&existing).unwrap().len(), IDENTITY_PRIVATE_SIZE);
    }

    #[test]
    fn test_private_identity_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity_file");
        std::fs::write(&path, [0u8; 12]).unwrap();

        let err = PrivateIdentity::from_file(&path).unwrap_err();
        assert!(matches!(err, MeshError::InvalidIdentity(_)));
    }

    #[test]
    fn test_sign_and_verify_through_public_identity() {
        let identity = PrivateIdentity::generate();
        let signature = identity.sign(b"proof");
        identity.identity().verify(b"proof", &signature).unwrap();
        assert!(identity.identity().verify(b"forged", &signature).is_err());
    }

    #[test]
    fn test_display_uses_pretty_hash() {
        let identity = PrivateIdentity::generate();
        let shown = identity.to_string();
        assert!(shown.starts_with('<') && shown.ends_with('>'));
        assert_eq!(shown, identity.hash().to_string());
    }

    #[test]
    fn test_known_destinations_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage").join("known_destinations");

        let identity = *PrivateIdentity::generate().identity();
        let destination = DestinationHash::new([9u8; 16]);

        let mut known = KnownDestinations::new();
        assert!(known.recall(&destination).is_none());
        known.remember(destination, identity, b"app".to_vec());
        known.save(&path).unwrap();

        let loaded = KnownDestinations::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.recall(&destination), Some(identity));
        assert_eq!(loaded.recall_app_data(&destination), Some(&b"app"[..]));
    }

    #[test]
    fn test_known_destinations_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let known = KnownDestinations::load(dir.path().join("absent")).unwrap();
        assert!(known.is_empty());
    }
}
