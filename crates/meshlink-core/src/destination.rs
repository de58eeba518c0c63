//! Destinations and announces
//!
//! A destination is a named endpoint owned by an identity. Its name is the
//! application name followed by aspects, joined with dots
//! (`example_utilities.linkexample`). The destination hash binds that name to
//! the owning identity, so the same name under two identities yields two
//! distinct addresses.

use std::fmt;
use std::sync::Arc;

use rand_core::{OsRng, RngCore};

use crate::crypto::{PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::identity::{Identity, PrivateIdentity, IDENTITY_PUBLIC_SIZE};
use crate::types::{full_hash, truncated_hash, DestinationHash, IdentityHash, Timestamp};
use crate::{MeshError, Result};

/// Length of the name hash carried in announces
pub const NAME_HASH_LENGTH: usize = 10;

/// Length of the per-announce random blob
pub const RANDOM_HASH_LENGTH: usize = 10;

/// Minimum announce payload: keys, name hash, random hash, signature
pub const ANNOUNCE_MIN_SIZE: usize =
    IDENTITY_PUBLIC_SIZE + NAME_HASH_LENGTH + RANDOM_HASH_LENGTH + SIGNATURE_SIZE;

// ----------------------------------------------------------------------------
// Destination Attributes
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Hosted locally; accepts links and packets
    In,
    /// Remote endpoint we send to
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationType {
    /// Owned by a single identity; traffic is encrypted to that identity
    Single,
}

/// Whether the stack should automatically prove receipt of packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProofStrategy {
    #[default]
    ProveNone,
    ProveAll,
}

// ----------------------------------------------------------------------------
// Destination
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Destination {
    direction: Direction,
    kind: DestinationType,
    name: String,
    identity: Identity,
    private: Option<Arc<PrivateIdentity>>,
    name_hash: [u8; NAME_HASH_LENGTH],
    hash: DestinationHash,
    proof_strategy: ProofStrategy,
}

impl Destination {
    /// Local destination that can be announced and accept links
    pub fn inbound(identity: Arc<PrivateIdentity>, app_name: &str, aspects: &[&str]) -> Result<Self> {
        let public = *identity.identity();
        Self::build(Direction::In, public, Some(identity), app_name, aspects)
    }

    /// Remote destination, usually built from a recalled identity
    pub fn outbound(identity: Identity, app_name: &str, aspects: &[&str]) -> Result<Self> {
        Self::build(Direction::Out, identity, None, app_name, aspects)
    }

    fn build(
        direction: Direction,
        identity: Identity,
        private: Option<Arc<PrivateIdentity>>,
        app_name: &str,
        aspects: &[&str],
    ) -> Result<Self> {
        let name = Self::full_name(app_name, aspects)?;
        let name_hash = Self::name_hash(&name);
        let hash = Self::hash_for(&name_hash, &identity.hash());

        Ok(Self {
            direction,
            kind: DestinationType::Single,
            name,
            identity,
            private,
            name_hash,
            hash,
            proof_strategy: ProofStrategy::default(),
        })
    }

    /// Join the app name and aspects with dots, rejecting dots inside parts
    pub fn full_name(app_name: &str, aspects: &[&str]) -> Result<String> {
        if app_name.is_empty() {
            return Err(MeshError::InvalidName("app name cannot be empty".to_string()));
        }
        for part in std::iter::once(&app_name).chain(aspects.iter()) {
            if part.contains('.') {
                return Err(MeshError::InvalidName(format!(
                    "dots are not allowed in app names or aspects: {:?}",
                    part
                )));
            }
        }
        let mut name = app_name.to_string();
        for aspect in aspects {
            name.push('.');
            name.push_str(aspect);
        }
        Ok(name)
    }

    pub fn name_hash(full_name: &str) -> [u8; NAME_HASH_LENGTH] {
        let digest = full_hash(full_name.as_bytes());
        let mut out = [0u8; NAME_HASH_LENGTH];
        out.copy_from_slice(&digest[..NAME_HASH_LENGTH]);
        out
    }

    pub fn hash_for(name_hash: &[u8; NAME_HASH_LENGTH], identity_hash: &IdentityHash) -> DestinationHash {
        let mut material = Vec::with_capacity(NAME_HASH_LENGTH + identity_hash.as_bytes().len());
        material.extend_from_slice(name_hash);
        material.extend_from_slice(identity_hash.as_bytes());
        DestinationHash::new(truncated_hash(material))
    }

    pub fn hash(&self) -> DestinationHash {
        self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn kind(&self) -> DestinationType {
        self.kind
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn private_identity(&self) -> Option<&PrivateIdentity> {
        self.private.as_deref()
    }

    pub fn proof_strategy(&self) -> ProofStrategy {
        self.proof_strategy
    }

    pub fn set_proof_strategy(&mut self, strategy: ProofStrategy) {
        self.proof_strategy = strategy;
    }

    /// Build a signed announce payload for this destination
    pub fn announce_payload(&self, app_data: &[u8]) -> Result<Vec<u8>> {
        let private = self
            .private
            .as_deref()
            .ok_or(MeshError::WrongDirection(self.hash, "only inbound destinations can announce"))?;

        let mut random_hash = [0u8; RANDOM_HASH_LENGTH];
        OsRng.fill_bytes(&mut random_hash[..5]);
        let seconds = Timestamp::now().as_secs().to_be_bytes();
        random_hash[5..].copy_from_slice(&seconds[3..]);

        let public_keys = self.identity.public_bytes();
        let signed = announce_signed_data(&self.hash, &public_keys, &self.name_hash, &random_hash, app_data);
        let signature = private.sign(&signed);

        let mut payload = Vec::with_capacity(ANNOUNCE_MIN_SIZE + app_data.len());
        payload.extend_from_slice(&public_keys);
        payload.extend_from_slice(&self.name_hash);
        payload.extend_from_slice(&random_hash);
        payload.extend_from_slice(&signature);
        payload.extend_from_slice(app_data);
        Ok(payload)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.hash)
    }
}

fn announce_signed_data(
    destination: &DestinationHash,
    public_keys: &[u8],
    name_hash: &[u8],
    random_hash: &[u8],
    app_data: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(
        destination.as_bytes().len()
            + public_keys.len()
            + name_hash.len()
            + random_hash.len()
            + app_data.len(),
    );
    data.extend_from_slice(destination.as_bytes());
    data.extend_from_slice(public_keys);
    data.extend_from_slice(name_hash);
    data.extend_from_slice(random_hash);
    data.extend_from_slice(app_data);
    data
}

// ----------------------------------------------------------------------------
// Announce Validation
// ----------------------------------------------------------------------------

/// Contents of a validated announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub destination: DestinationHash,
    pub identity: Identity,
    pub name_hash: [u8; NAME_HASH_LENGTH],
    pub random_hash: [u8; RANDOM_HASH_LENGTH],
    pub app_data: Vec<u8>,
}

impl Announce {
    /// Parse and verify an announce received for `destination`
    pub fn validate(destination: DestinationHash, payload: &[u8]) -> Result<Self> {
        if payload.len() < ANNOUNCE_MIN_SIZE {
            return Err(MeshError::invalid_packet(format!(
                "Announce too short: {} bytes",
                payload.len()
            )));
        }

        let (public_keys, rest) = payload.split_at(PUBLIC_KEY_SIZE * 2);
        let (name_hash_bytes, rest) = rest.split_at(NAME_HASH_LENGTH);
        let (random_bytes, rest) = rest.split_at(RANDOM_HASH_LENGTH);
        let (signature_bytes, app_data) = rest.split_at(SIGNATURE_SIZE);

        let identity = Identity::from_public_bytes(public_keys)?;

        let mut name_hash = [0u8; NAME_HASH_LENGTH];
        name_hash.copy_from_slice(name_hash_bytes);
        let mut random_hash = [0u8; RANDOM_HASH_LENGTH];
        random_hash.copy_from_slice(random_bytes);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(signature_bytes);

        if Destination::hash_for(&name_hash, &identity.hash()) != destination {
            return Err(MeshError::invalid_packet(
                "Announced destination does not match name hash and identity",
            ));
        }

        let signed = announce_signed_data(&destination, public_keys, &name_hash, &random_hash, app_data);
        identity.verify(&signed, &signature)?;

        Ok(Self {
            destination,
            identity,
            name_hash,
            random_hash,
            app_data: app_data.to_vec(),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
