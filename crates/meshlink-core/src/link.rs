//! Encrypted links
//!
//! A link is a bidirectional encrypted channel between an initiator and an
//! inbound destination.
//!
//! ```text
//! initiator                                  responder
//!     | LinkRequest: noise message 1             |
//!     |----------------------------------------->|  link id = hash(dest || msg1)
//!     |      LinkProof: msg2 || sig(id || msg2)  |
//!     |<-----------------------------------------|  active
//!  active                                        |
//!     | LinkData / KeepAlive / LinkClose:         |
//!     |      nonce(8) || ciphertext || tag(16)    |
//!     |<---------------------------------------->|
//! ```
//!
//! Each direction numbers its packets; the receiver keeps a replay window so
//! duplicated or replayed datagrams are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::LinkConfig;
use crate::crypto::{LinkHandshake, LinkSession, AEAD_TAG_SIZE, NONCE_SIZE, SIGNATURE_SIZE};
use crate::dedup::ReplayWindow;
use crate::destination::Destination;
use crate::identity::Identity;
use crate::interface::Hop;
use crate::packet::{Packet, PacketType, MAX_PAYLOAD_SIZE};
use crate::transport::StackInner;
use crate::types::{truncated_hash, DestinationHash, LinkId, PacketHash};
use crate::{MeshError, Result};

/// Largest plaintext that fits in one link packet
pub const LINK_MDU: usize = MAX_PAYLOAD_SIZE - NONCE_SIZE - AEAD_TAG_SIZE;

// ----------------------------------------------------------------------------
// Link Attributes
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Request sent, waiting for the proof
    Pending,
    Active,
    Closed,
}

/// Why a link was closed. The closing side is named from the point of view
/// of the link, so both ends agree on the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Establishment or stale timeout
    Timeout,
    InitiatorClosed,
    DestinationClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Established,
    Packet { data: Vec<u8>, packet: PacketHash },
    Closed(TeardownReason),
}

/// Receiving end of a link's events
#[derive(Debug)]
pub struct LinkEvents {
    receiver: mpsc::UnboundedReceiver<LinkEvent>,
}

impl LinkEvents {
    /// Next event; `None` once the link and the stack are gone
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.receiver.try_recv().ok()
    }
}

/// What the maintenance ticker should do with a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkUpkeep {
    Nothing,
    SendKeepAlive,
    Expire,
}

// ----------------------------------------------------------------------------
// Shared Link State
// ----------------------------------------------------------------------------

pub(crate) fn link_id_for(destination: &DestinationHash, request: &[u8]) -> LinkId {
    let mut material = Vec::with_capacity(destination.as_bytes().len() + request.len());
    material.extend_from_slice(destination.as_bytes());
    material.extend_from_slice(request);
    LinkId::new(truncated_hash(material))
}

fn proof_signed_data(id: &LinkId, reply: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(id.as_bytes().len() + reply.len());
    data.extend_from_slice(id.as_bytes());
    data.extend_from_slice(reply);
    data
}

struct LinkState {
    status: LinkStatus,
    reason: Option<TeardownReason>,
    handshake: Option<LinkHandshake>,
    session: Option<LinkSession>,
    tx_nonce: u64,
    replay: ReplayWindow,
    created: Instant,
    last_inbound: Instant,
    last_outbound: Instant,
}

/// State owned jointly by the stack and every [`Link`] handle
pub(crate) struct LinkShared {
    id: LinkId,
    role: LinkRole,
    destination: DestinationHash,
    remote_identity: Option<Identity>,
    hop: Hop,
    state: Mutex<LinkState>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkShared {
    fn new(
        id: LinkId,
        role: LinkRole,
        destination: DestinationHash,
        remote_identity: Option<Identity>,
        hop: Hop,
        handshake: Option<LinkHandshake>,
        session: Option<LinkSession>,
    ) -> (Arc<Self>, LinkEvents) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let now = Instant::now();
        let status = if session.is_some() {
            LinkStatus::Active
        } else {
            LinkStatus::Pending
        };

        let shared = Arc::new(Self {
            id,
            role,
            destination,
            remote_identity,
            hop,
            state: Mutex::new(LinkState {
                status,
                reason: None,
                handshake,
                session,
                tx_nonce: 0,
                replay: ReplayWindow::new(),
                created: now,
                last_inbound: now,
                last_outbound: now,
            }),
            events: sender,
        });
        (shared, LinkEvents { receiver })
    }

    /// Begin a link to an outbound destination. Returns the request payload.
    pub(crate) fn initiate(destination: &Destination, hop: Hop) -> Result<(Arc<Self>, LinkEvents, Vec<u8>)> {
        let remote = *destination.identity();
        let mut handshake = LinkHandshake::initiator(remote.encryption_key())?;
        let request = handshake.write_message(&[])?;
        let id = link_id_for(&destination.hash(), &request);

        let (shared, events) = Self::new(
            id,
            LinkRole::Initiator,
            destination.hash(),
            Some(remote),
            hop,
            Some(handshake),
            None,
        );
        Ok((shared, events, request))
    }

    /// Answer a link request for a local destination. Returns the proof payload.
    pub(crate) fn accept(destination: &Destination, request: &[u8], hop: Hop) -> Result<(Arc<Self>, LinkEvents, Vec<u8>)> {
        let private = destination.private_identity().ok_or(MeshError::WrongDirection(
            destination.hash(),
            "links can only be accepted by inbound destinations",
        ))?;

        let mut handshake = LinkHandshake::responder(private.static_keys())?;
        handshake.read_message(request)?;
        let id = link_id_for(&destination.hash(), request);
        let reply = handshake.write_message(&[])?;
        let session = handshake.into_session()?;

        let signature = private.sign(&proof_signed_data(&id, &reply));
        let mut proof = reply;
        proof.extend_from_slice(&signature);

        let (shared, events) = Self::new(
            id,
            LinkRole::Responder,
            destination.hash(),
            None,
            hop,
            None,
            Some(session),
        );
        shared.emit(LinkEvent::Established);
        Ok((shared, events, proof))
    }

    /// Finish an initiated link with the responder's proof
    pub(crate) fn complete(&self, proof: &[u8]) -> Result<()> {
        let remote = self
            .remote_identity
            .ok_or_else(|| MeshError::invalid_packet("Proof received on a responder link"))?;
        if proof.len() <= SIGNATURE_SIZE {
            return Err(MeshError::invalid_packet(format!(
                "Link proof too short: {} bytes",
                proof.len()
            )));
        }
        let (reply, signature_bytes) = proof.split_at(proof.len() - SIGNATURE_SIZE);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(signature_bytes);
        remote.verify(&proof_signed_data(&self.id, reply), &signature)?;

        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.status != LinkStatus::Pending {
                return Err(MeshError::invalid_packet("Link is not awaiting a proof"));
            }
            let mut handshake = state
                .handshake
                .take()
                .ok_or_else(|| MeshError::invalid_packet("Link has no pending handshake"))?;
            handshake.read_message(reply)?;
            state.session = Some(handshake.into_session()?);
            state.status = LinkStatus::Active;
            state.last_inbound = Instant::now();
        }

        self.emit(LinkEvent::Established);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LinkEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn id(&self) -> LinkId {
        self.id
    }

    pub(crate) fn hop(&self) -> Hop {
        self.hop
    }

    pub(crate) fn status(&self) -> LinkStatus {
        self.lock().status
    }

    /// Encrypt `plaintext` with the next outbound nonce
    pub(crate) fn encrypt_outbound(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let session = match (&state.status, &state.session) {
            (LinkStatus::Active, Some(session)) => session,
            _ => return Err(MeshError::LinkNotActive(self.id)),
        };

        let nonce = state.tx_nonce;
        let ciphertext = session.encrypt(nonce, plaintext)?;
        state.tx_nonce += 1;
        state.last_outbound = Instant::now();

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce.to_be_bytes());
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// Authenticate and decrypt an inbound link payload
    pub(crate) fn decrypt_inbound(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < NONCE_SIZE + AEAD_TAG_SIZE {
            return Err(MeshError::invalid_packet(format!(
                "Link payload too short: {} bytes",
                payload.len()
            )));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        let nonce = u64::from_be_bytes(nonce);

        let mut guard = self.lock();
        let state = &mut *guard;
        let session = match (&state.status, &state.session) {
            (LinkStatus::Active, Some(session)) => session,
            _ => return Err(MeshError::LinkNotActive(self.id)),
        };

        let plaintext = session.decrypt(nonce, ciphertext)?;
        if !state.replay.accept(nonce) {
            return Err(MeshError::invalid_packet(format!(
                "Replayed nonce {} on link {}",
                nonce, self.id
            )));
        }
        state.last_inbound = Instant::now();
        Ok(plaintext)
    }

    pub(crate) fn deliver(&self, data: Vec<u8>, packet: PacketHash) {
        self.emit(LinkEvent::Packet { data, packet });
    }

    /// Reason recorded when this side closes the link
    pub(crate) fn local_close_reason(&self) -> TeardownReason {
        match self.role {
            LinkRole::Initiator => TeardownReason::InitiatorClosed,
            LinkRole::Responder => TeardownReason::DestinationClosed,
        }
    }

    /// Reason recorded when the other side closes the link
    pub(crate) fn remote_close_reason(&self) -> TeardownReason {
        match self.role {
            LinkRole::Initiator => TeardownReason::DestinationClosed,
            LinkRole::Responder => TeardownReason::InitiatorClosed,
        }
    }

    /// Close the link and emit [`LinkEvent::Closed`]. Returns false if it was
    /// already closed.
    pub(crate) fn mark_closed(&self, reason: TeardownReason) -> bool {
        {
            let mut state = self.lock();
            if state.status == LinkStatus::Closed {
                return false;
            }
            state.status = LinkStatus::Closed;
            state.reason = Some(reason);
            state.handshake = None;
            state.session = None;
        }
        self.emit(LinkEvent::Closed(reason));
        true
    }

    pub(crate) fn upkeep(&self, now: Instant, config: &LinkConfig) -> LinkUpkeep {
        let state = self.lock();
        match state.status {
            LinkStatus::Pending if now.duration_since(state.created) >= config.establishment_timeout() => {
                LinkUpkeep::Expire
            }
            LinkStatus::Active if now.duration_since(state.last_inbound) >= config.stale_timeout() => {
                LinkUpkeep::Expire
            }
            LinkStatus::Active if now.duration_since(state.last_outbound) >= config.keepalive_interval() => {
                LinkUpkeep::SendKeepAlive
            }
            _ => LinkUpkeep::Nothing,
        }
    }
}

// ----------------------------------------------------------------------------
// Link Handle
// ----------------------------------------------------------------------------

/// Handle to a link. Clones refer to the same link.
#[derive(Clone)]
pub struct Link {
    shared: Arc<LinkShared>,
    stack: Arc<StackInner>,
}

impl Link {
    pub(crate) fn new(shared: Arc<LinkShared>, stack: Arc<StackInner>) -> Self {
        Self { shared, stack }
    }

    pub fn id(&self) -> LinkId {
        self.shared.id
    }

    pub fn role(&self) -> LinkRole {
        self.shared.role
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    pub fn is_active(&self) -> bool {
        self.status() == LinkStatus::Active
    }

    /// Set once the link is closed
    pub fn teardown_reason(&self) -> Option<TeardownReason> {
        self.shared.lock().reason
    }

    /// Destination this link leads to (or was accepted on)
    pub fn destination_hash(&self) -> DestinationHash {
        self.shared.destination
    }

    /// Identity of the responder; unknown on the responder side
    pub fn remote_identity(&self) -> Option<Identity> {
        self.shared.remote_identity
    }

    /// Send one packet of at most [`LINK_MDU`] bytes
    pub async fn send(&self, data: &[u8]) -> Result<PacketHash> {
        if data.len() > LINK_MDU {
            return Err(MeshError::PayloadTooLarge {
                size: data.len(),
                max: LINK_MDU,
            });
        }
        let payload = self.shared.encrypt_outbound(data)?;
        let packet = Packet::new(PacketType::LinkData, *self.shared.id.as_bytes(), payload)?;
        self.stack.send_to_hop(&packet, self.shared.hop).await?;
        Ok(packet.hash())
    }

    /// Close the link, notifying the other side if it is active
    pub async fn teardown(&self) {
        self.stack.close_link(&self.shared).await;
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shared.id)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("status", &self.status())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrivateIdentity;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn hop() -> Hop {
        Hop {
            interface: 0,
            addr: SocketAddr::from(([127, 0, 0, 1], 4242)),
        }
    }

    fn destinations() -> (Destination, Destination) {
        let identity = Arc::new(PrivateIdentity::generate());
        let local = Destination::inbound(identity, "example_utilities", &["linkexample"]).unwrap();
        let remote = Destination::outbound(*local.identity(), "example_utilities", &["linkexample"]).unwrap();
        (local, remote)
    }

    fn established() -> (Arc<LinkShared>, LinkEvents, Arc<LinkShared>, LinkEvents) {
        let (local, remote) = destinations();
        let (initiator, initiator_events, request) = LinkShared::initiate(&remote, hop()).unwrap();
        let (responder, responder_events, proof) = LinkShared::accept(&local, &request, hop()).unwrap();
        initiator.complete(&proof).unwrap();
        (initiator, initiator_events, responder, responder_events)
    }

    #[test]
    fn test_link_mdu() {
        assert_eq!(LINK_MDU, 456);
    }

    #[test]
    fn test_handshake_establishes_both_sides() {
        let (initiator, mut initiator_events, responder, mut responder_events) = established();

        assert_eq!(initiator.id(), responder.id());
        assert_eq!(initiator.status(), LinkStatus::Active);
        assert_eq!(responder.status(), LinkStatus::Active);
        assert_eq!(initiator_events.try_recv(), Some(LinkEvent::Established));
        assert_eq!(responder_events.try_recv(), Some(LinkEvent::Established));
    }

    #[test]
    fn test_proof_from_wrong_identity_is_rejected() {
        let (_, remote) = destinations();
        let (impostor, _) = destinations();

        let (initiator, _events, request) = LinkShared::initiate(&remote, hop()).unwrap();
        // The impostor cannot even read a request meant for another key
        assert!(LinkShared::accept(&impostor, &request, hop()).is_err());

        let mut forged = vec![0u8; 48];
        forged.extend_from_slice(&[0u8; SIGNATURE_SIZE]);
        assert!(initiator.complete(&forged).is_err());
        assert_eq!(initiator.status(), LinkStatus::Pending);
    }

    #[test]
    fn test_data_flows_and_replays_are_dropped() {
        let (initiator, _, responder, _) = established();

        let first = initiator.encrypt_outbound(b"hello").unwrap();
        let second = initiator.encrypt_outbound(b"again").unwrap();
        assert_eq!(responder.decrypt_inbound(&second).unwrap(), b"again");
        assert_eq!(responder.decrypt_inbound(&first).unwrap(), b"hello");
        assert!(responder.decrypt_inbound(&first).is_err());

        let reply = responder.encrypt_outbound(b"reply").unwrap();
        assert_eq!(initiator.decrypt_inbound(&reply).unwrap(), b"reply");
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let (initiator, _, responder, _) = established();
        let mut payload = initiator.encrypt_outbound(b"hello").unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 1;
        assert!(responder.decrypt_inbound(&payload).is_err());
        assert!(responder.decrypt_inbound(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_close_reasons_follow_role() {
        let (initiator, mut initiator_events, responder, _) = established();
        assert_eq!(initiator.local_close_reason(), TeardownReason::InitiatorClosed);
        assert_eq!(initiator.remote_close_reason(), TeardownReason::DestinationClosed);
        assert_eq!(responder.local_close_reason(), TeardownReason::DestinationClosed);
        assert_eq!(responder.remote_close_reason(), TeardownReason::InitiatorClosed);

        initiator_events.try_recv();
        assert!(initiator.mark_closed(TeardownReason::Timeout));
        assert!(!initiator.mark_closed(TeardownReason::InitiatorClosed));
        assert_eq!(
            initiator_events.try_recv(),
            Some(LinkEvent::Closed(TeardownReason::Timeout))
        );
        assert!(matches!(
            initiator.encrypt_outbound(b"late"),
            Err(MeshError::LinkNotActive(_))
        ));
    }

    #[test]
    fn test_upkeep_timings() {
        let config = LinkConfig {
            establishment_timeout_secs: 5,
            keepalive_interval_secs: 10,
            stale_timeout_secs: 30,
        };

        let (_, remote) = destinations();
        let (pending, _, _) = LinkShared::initiate(&remote, hop()).unwrap();
        let start = Instant::now();
        assert_eq!(pending.upkeep(start, &config), LinkUpkeep::Nothing);
        assert_eq!(
            pending.upkeep(start + Duration::from_secs(6), &config),
            LinkUpkeep::Expire
        );

        let (active, _, _, _) = established();
        let start = Instant::now();
        assert_eq!(
            active.upkeep(start + Duration::from_secs(11), &config),
            LinkUpkeep::SendKeepAlive
        );
        assert_eq!(
            active.upkeep(start + Duration::from_secs(31), &config),
            LinkUpkeep::Expire
        );
    }
}
