//! Cryptographic primitives for meshlink
//!
//! Thin wrappers around the operations the stack needs: Ed25519 signatures
//! for announces and proofs, X25519 static keys, the Noise NK handshake used
//! to establish links, and one-shot sealing of packets addressed to a single
//! destination.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, OsRng, RngCore};
use sha2::{Digest, Sha256};
use snow::{Builder, HandshakeState, StatelessTransportState};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{MeshError, Result};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Noise pattern for links: the initiator knows the responder's static key
pub const NOISE_PATTERN: &str = "Noise_NK_25519_ChaChaPoly_SHA256";

/// Size of X25519 and Ed25519 public keys
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

/// Size of the Poly1305 authentication tag
pub const AEAD_TAG_SIZE: usize = 16;

/// Size of the explicit nonce carried by link packets
pub const NONCE_SIZE: usize = 8;

const HANDSHAKE_BUFFER_SIZE: usize = 1024;
const SEAL_CONTEXT: &[u8] = b"meshlink-seal-v1";

// ----------------------------------------------------------------------------
// Signing Key Pair (Ed25519)
// ----------------------------------------------------------------------------

/// Ed25519 key pair used to sign announces, link proofs and delivery proofs
#[derive(Debug, Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);
        Self::from_bytes(&secret_bytes)
    }

    pub fn from_bytes(private_key: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(private_key),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign<T: AsRef<[u8]>>(&self, data: T) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(data.as_ref()).to_bytes()
    }

    /// Verify a signature made by the holder of `public_key`
    pub fn verify<D: AsRef<[u8]>>(
        public_key: &[u8; 32],
        data: D,
        signature: &[u8; SIGNATURE_SIZE],
    ) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(public_key).map_err(|_| MeshError::Signature)?;
        let signature = Signature::from_bytes(signature);
        verifying_key
            .verify(data.as_ref(), &signature)
            .map_err(|_| MeshError::Signature)
    }
}

// ----------------------------------------------------------------------------
// Static Key Pair (X25519)
// ----------------------------------------------------------------------------

/// Long-lived X25519 key pair; the Noise static key of a destination
#[derive(Clone)]
pub struct StaticKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl core::fmt::Debug for StaticKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StaticKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish()
    }
}

impl StaticKeyPair {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_bytes(private_key: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*private_key);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    fn diffie_hellman(&self, remote_public: &[u8; 32]) -> [u8; 32] {
        self.secret
            .diffie_hellman(&PublicKey::from(*remote_public))
            .to_bytes()
    }
}

// ----------------------------------------------------------------------------
// Link Handshake (Noise NK)
// ----------------------------------------------------------------------------

/// Noise NK handshake: one message from the initiator, one reply
pub struct LinkHandshake {
    state: HandshakeState,
}

impl core::fmt::Debug for LinkHandshake {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkHandshake")
            .field("initiator", &self.state.is_initiator())
            .field("finished", &self.state.is_handshake_finished())
            .finish()
    }
}

impl LinkHandshake {
    /// Initiator side; `remote_static` is the destination's X25519 public key
    pub fn initiator(remote_static: &[u8; 32]) -> Result<Self> {
        let state = Builder::new(NOISE_PATTERN.parse()?)
            .remote_public_key(remote_static)
            .build_initiator()?;
        Ok(Self { state })
    }

    /// Responder side, holding the destination's static key
    pub fn responder(local_static: &StaticKeyPair) -> Result<Self> {
        let state = Builder::new(NOISE_PATTERN.parse()?)
            .local_private_key(&local_static.private_key_bytes())
            .build_responder()?;
        Ok(Self { state })
    }

    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; HANDSHAKE_BUFFER_SIZE + payload.len()];
        let len = self.state.write_message(payload, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    pub fn read_message(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; input.len()];
        let len = self.state.read_message(input, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Switch to transport mode with explicit nonces
    pub fn into_session(self) -> Result<LinkSession> {
        if !self.state.is_handshake_finished() {
            return Err(MeshError::crypto("Link handshake is not finished"));
        }
        let state = self.state.into_stateless_transport_mode()?;
        Ok(LinkSession { state })
    }
}

// ----------------------------------------------------------------------------
// Link Session
// ----------------------------------------------------------------------------

/// Established link cipher. Nonces travel with each packet so loss or
/// reordering of datagrams never desynchronizes the two ends.
pub struct LinkSession {
    state: StatelessTransportState,
}

impl core::fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkSession").finish_non_exhaustive()
    }
}

impl LinkSession {
    pub fn encrypt(&self, nonce: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut ciphertext = vec![0u8; plaintext.len() + AEAD_TAG_SIZE];
        let len = self.state.write_message(nonce, plaintext, &mut ciphertext)?;
        ciphertext.truncate(len);
        Ok(ciphertext)
    }

    pub fn decrypt(&self, nonce: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut plaintext = vec![0u8; ciphertext.len()];
        let len = self
            .state
            .read_message(nonce, ciphertext, &mut plaintext)
            .map_err(|_| MeshError::crypto("Link packet failed authentication"))?;
        plaintext.truncate(len);
        Ok(plaintext)
    }
}

// ----------------------------------------------------------------------------
// Sealed Packets
// ----------------------------------------------------------------------------

fn seal_key(shared: &[u8; 32], ephemeral_public: &[u8; 32], recipient_public: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SEAL_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);
    let digest = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Encrypt `plaintext` so only the holder of `recipient_public` can read it.
///
/// Output layout: `ephemeral_public(32) || ciphertext || tag(16)`. Every call
/// uses a fresh ephemeral key, so the derived key is never reused and a zero
/// nonce is sufficient.
pub fn seal(recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = StaticKeyPair::generate();
    let ephemeral_public = ephemeral.public_key_bytes();
    let shared = ephemeral.diffie_hellman(recipient_public);
    let key = seal_key(&shared, &ephemeral_public, recipient_public);

    let cipher = ChaCha20Poly1305::new(&key.into());
    let ciphertext = cipher
        .encrypt(&Nonce::default(), plaintext)
        .map_err(|_| MeshError::crypto("Sealing failed"))?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    out.extend_from_slice(&ephemeral_public);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`seal`] using the recipient's static key
pub fn open(recipient: &StaticKeyPair, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < PUBLIC_KEY_SIZE + AEAD_TAG_SIZE {
        return Err(MeshError::crypto("Sealed payload too short"));
    }
    let (ephemeral_bytes, ciphertext) = sealed.split_at(PUBLIC_KEY_SIZE);
    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(ephemeral_bytes);

    let shared = recipient.diffie_hellman(&ephemeral_public);
    let key = seal_key(&shared, &ephemeral_public, &recipient.public_key_bytes());

    let cipher = ChaCha20Poly1305::new(&key.into());
    cipher
        .decrypt(&Nonce::default(), ciphertext)
        .map_err(|_| MeshError::crypto("Sealed payload failed authentication"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_pair() -> (LinkSession, LinkSession) {
        let server_static = StaticKeyPair::generate();
        let mut initiator = LinkHandshake::initiator(&server_static.public_key_bytes()).unwrap();
        let mut responder = LinkHandshake::responder(&server_static).unwrap();

        let request = initiator.write_message(&[]).unwrap();
        responder.read_message(&request).unwrap();
        let reply = responder.write_message(&[]).unwrap();
        initiator.read_message(&reply).unwrap();

        assert!(initiator.is_finished());
        assert!(responder.is_finished());
        (
            initiator.into_session().unwrap(),
            responder.into_session().unwrap(),
        )
    }

    #[test]
    fn test_signing_keypair() {
        let keypair = SigningKeyPair::generate();
        let public_key = keypair.public_key_bytes();

        let data = b"announce body";
        let signature = keypair.sign(data);
        SigningKeyPair::verify(&public_key, data, &signature).unwrap();

        assert!(SigningKeyPair::verify(&public_key, b"other body", &signature).is_err());
        assert!(SigningKeyPair::verify(&public_key, data, &[0u8; 64]).is_err());
    }

    #[test]
    fn test_signing_keypair_roundtrips_private_bytes() {
        let keypair = SigningKeyPair::generate();
        let restored = SigningKeyPair::from_bytes(&keypair.private_key_bytes());
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_static_keypair_from_bytes() {
        let keypair = StaticKeyPair::generate();
        let restored = StaticKeyPair::from_bytes(&keypair.private_key_bytes());
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_link_session_both_directions() {
        let (initiator, responder) = handshake_pair();

        let ciphertext = initiator.encrypt(0, b"hello server").unwrap();
        assert_eq!(ciphertext.len(), b"hello server".len() + AEAD_TAG_SIZE);
        assert_eq!(responder.decrypt(0, &ciphertext).unwrap(), b"hello server");

        let reply = responder.encrypt(0, b"hello client").unwrap();
        assert_eq!(initiator.decrypt(0, &reply).unwrap(), b"hello client");
    }

    #[test]
    fn test_link_session_out_of_order_nonces() {
        let (initiator, responder) = handshake_pair();

        let first = initiator.encrypt(1, b"first").unwrap();
        let second = initiator.encrypt(2, b"second").unwrap();

        assert_eq!(responder.decrypt(2, &second).unwrap(), b"second");
        assert_eq!(responder.decrypt(1, &first).unwrap(), b"first");
    }

    #[test]
    fn test_link_session_wrong_nonce_fails() {
        let (initiator, responder) = handshake_pair();
        let ciphertext = initiator.encrypt(5, b"data").unwrap();
        assert!(responder.decrypt(6, &ciphertext).is_err());
    }

    #[test]
    fn test_handshake_with_wrong_static_key_fails() {
        let server_static = StaticKeyPair::generate();
        let impostor = StaticKeyPair::generate();

        let mut initiator = LinkHandshake::initiator(&server_static.public_key_bytes()).unwrap();
        let mut responder = LinkHandshake::responder(&impostor).unwrap();

        let request = initiator.write_message(&[]).unwrap();
        assert!(responder.read_message(&request).is_err());
    }

    #[test]
    fn test_unfinished_handshake_cannot_become_session() {
        let server_static = StaticKeyPair::generate();
        let initiator = LinkHandshake::initiator(&server_static.public_key_bytes()).unwrap();
        assert!(initiator.into_session().is_err());
    }

    #[test]
    fn test_seal_and_open() {
        let recipient = StaticKeyPair::generate();
        let sealed = seal(&recipient.public_key_bytes(), b"single packet").unwrap();
        assert_eq!(open(&recipient, &sealed).unwrap(), b"single packet");

        let stranger = StaticKeyPair::generate();
        assert!(open(&stranger, &sealed).is_err());
        assert!(open(&recipient, &sealed[..20]).is_err());
    }
}
