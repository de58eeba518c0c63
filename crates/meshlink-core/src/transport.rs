//! The stack: interfaces, path table, links and packet dispatch
//!
//! [`Stack::start`] binds the configured interfaces and spawns one receive
//! loop per interface plus a maintenance ticker. All mutable state lives
//! behind one mutex that is never held across an await; handlers compute
//! what to send while locked and transmit afterwards.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::StackConfig;
use crate::crypto::{self, AEAD_TAG_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::dedup::PacketCache;
use crate::destination::{Announce, Destination, Direction, ProofStrategy};
use crate::identity::{Identity, KnownDestinations};
use crate::interface::{Hop, InterfaceId, UdpInterface};
use crate::link::{link_id_for, Link, LinkEvents, LinkShared, LinkUpkeep, TeardownReason};
use crate::packet::{Packet, PacketContext, PacketType, MAX_PAYLOAD_SIZE};
use crate::types::{DestinationHash, LinkId, PacketHash, TRUNCATED_HASH_BYTES};
use crate::{MeshError, Result};

/// Largest plaintext that fits in one sealed data packet
pub const PACKET_MDU: usize = MAX_PAYLOAD_SIZE - PUBLIC_KEY_SIZE - AEAD_TAG_SIZE;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Events and Receipts
// ----------------------------------------------------------------------------

/// Something that happened on a registered inbound destination
#[derive(Debug)]
pub enum DestinationEvent {
    /// A remote initiator established a link
    LinkEstablished { link: Link, events: LinkEvents },
    /// A single packet addressed to the destination
    Packet { data: Vec<u8>, packet: PacketHash },
}

#[derive(Debug)]
pub struct DestinationEvents {
    receiver: mpsc::UnboundedReceiver<DestinationEvent>,
}

impl DestinationEvents {
    pub async fn recv(&mut self) -> Option<DestinationEvent> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Delivered,
    TimedOut,
}

/// Tracks the delivery proof for a packet sent with [`Stack::send_packet`]
#[derive(Debug)]
pub struct PacketReceipt {
    hash: PacketHash,
    proved: oneshot::Receiver<()>,
    timeout: Duration,
}

impl PacketReceipt {
    pub fn hash(&self) -> PacketHash {
        self.hash
    }

    /// Wait for a valid proof or the receipt timeout
    pub async fn wait(self) -> ReceiptStatus {
        match tokio::time::timeout(self.timeout, self.proved).await {
            Ok(Ok(())) => ReceiptStatus::Delivered,
            _ => ReceiptStatus::TimedOut,
        }
    }
}

// ----------------------------------------------------------------------------
// Stack State
// ----------------------------------------------------------------------------

struct LocalDestination {
    destination: Destination,
    app_data: Vec<u8>,
    events: mpsc::UnboundedSender<DestinationEvent>,
}

#[derive(Debug, Clone, Copy)]
struct PathEntry {
    hop: Hop,
    hops: u8,
}

struct PendingReceipt {
    identity: Identity,
    proved: oneshot::Sender<()>,
    deadline: Instant,
}

struct StackState {
    running: bool,
    destinations: HashMap<DestinationHash, LocalDestination>,
    known: KnownDestinations,
    paths: HashMap<DestinationHash, PathEntry>,
    links: HashMap<LinkId, Arc<LinkShared>>,
    receipts: HashMap<PacketHash, PendingReceipt>,
    seen: PacketCache,
}

pub(crate) struct StackInner {
    config: StackConfig,
    interfaces: Vec<Arc<UdpInterface>>,
    state: Mutex<StackState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StackInner {
    fn lock(&self) -> MutexGuard<'_, StackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.lock().running {
            Ok(())
        } else {
            Err(MeshError::Shutdown)
        }
    }

    /// Remember our own packets so echoes from broadcast addresses are dropped
    fn remember_sent(&self, packet: &Packet) {
        self.lock().seen.insert(packet.hash());
    }

    pub(crate) async fn send_to_hop(&self, packet: &Packet, hop: Hop) -> Result<()> {
        self.ensure_running()?;
        let interface = self
            .interfaces
            .get(hop.interface)
            .ok_or_else(|| MeshError::config(format!("No interface with index {}", hop.interface)))?;
        self.remember_sent(packet);
        trace!("Sending {:?} {} to {}", packet.packet_type, packet, hop.addr);
        interface.send_to(&packet.encode(), hop.addr).await
    }

    async fn broadcast(&self, packet: &Packet) -> Result<()> {
        self.ensure_running()?;
        self.remember_sent(packet);
        let bytes = packet.encode();
        for interface in &self.interfaces {
            interface.broadcast(&bytes).await;
        }
        Ok(())
    }

    /// Close a link from this side, notifying the peer if possible
    pub(crate) async fn close_link(&self, link: &Arc<LinkShared>) {
        if let Ok(payload) = link.encrypt_outbound(link.id().as_bytes()) {
            match Packet::new(PacketType::LinkClose, *link.id().as_bytes(), payload) {
                Ok(packet) => {
                    if let Err(e) = self.send_to_hop(&packet, link.hop()).await {
                        debug!("Could not send close for link {}: {}", link.id(), e);
                    }
                }
                Err(e) => debug!("Could not build close for link {}: {}", link.id(), e),
            }
        }
        self.lock().links.remove(&link.id());
        if link.mark_closed(link.local_close_reason()) {
            debug!("Link {} closed locally", link.id());
        }
    }

    fn find_link(&self, id: &LinkId) -> Result<Arc<LinkShared>> {
        self.lock()
            .links
            .get(id)
            .cloned()
            .ok_or_else(|| MeshError::invalid_packet(format!("Unknown link {}", id)))
    }

    // ---- Inbound Dispatch ----

    async fn handle_datagram(self: &Arc<Self>, bytes: &[u8], hop: Hop) {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", hop.addr, e);
                return;
            }
        };

        {
            let mut state = self.lock();
            if !state.running {
                return;
            }
            if !state.seen.insert(packet.hash()) {
                trace!("Dropping duplicate packet {}", packet);
                return;
            }
        }

        let packet_type = packet.packet_type;
        let result = match packet_type {
            PacketType::Announce => self.handle_announce(&packet, hop),
            PacketType::Data => self.handle_data(&packet, hop).await,
            PacketType::LinkRequest => self.handle_link_request(&packet, hop).await,
            PacketType::LinkProof => self.handle_link_proof(&packet),
            PacketType::LinkData => self.handle_link_data(&packet),
            PacketType::KeepAlive => self.handle_keepalive(&packet),
            PacketType::LinkClose => self.handle_link_close(&packet),
            PacketType::PathRequest => self.handle_path_request(&packet, hop).await,
            PacketType::Proof => self.handle_proof(&packet),
        };

        if let Err(e) = result {
            debug!("Dropped {:?} packet {} from {}: {}", packet_type, packet, hop.addr, e);
        }
    }

    fn handle_announce(&self, packet: &Packet, hop: Hop) -> Result<()> {
        let announce = Announce::validate(packet.destination_hash(), &packet.payload)?;
        let mut state = self.lock();
        if state.destinations.contains_key(&announce.destination) {
            return Ok(());
        }

        let hops = packet.hops.saturating_add(1);
        debug!(
            "Valid announce for {} from {} ({} hop{})",
            announce.destination,
            hop.addr,
            hops,
            if hops == 1 { "" } else { "s" }
        );
        state
            .known
            .remember(announce.destination, announce.identity, announce.app_data);
        state
            .paths
            .insert(announce.destination, PathEntry { hop, hops });
        Ok(())
    }

    async fn handle_data(&self, packet: &Packet, hop: Hop) -> Result<()> {
        let destination = packet.destination_hash();
        let (data, events, proof) = {
            let state = self.lock();
            let local = state
                .destinations
                .get(&destination)
                .ok_or_else(|| MeshError::invalid_packet(format!("{} is not a local destination", destination)))?;
            let private = local
                .destination
                .private_identity()
                .ok_or(MeshError::WrongDirection(destination, "not an inbound destination"))?;

            let data = crypto::open(private.static_keys(), &packet.payload)?;
            let proof = match local.destination.proof_strategy() {
                ProofStrategy::ProveAll => Some(private.sign(packet.hash().as_bytes())),
                ProofStrategy::ProveNone => None,
            };
            (data, local.events.clone(), proof)
        };

        debug!("Received packet {} for {}", packet, destination);
        let _ = events.send(DestinationEvent::Packet {
            data,
            packet: packet.hash(),
        });

        if let Some(signature) = proof {
            let proof = Packet::new(PacketType::Proof, *packet.hash().as_bytes(), signature.to_vec())?;
            self.send_to_hop(&proof, hop).await?;
            debug!("Sent proof for packet {}", packet);
        }
        Ok(())
    }

    async fn handle_link_request(self: &Arc<Self>, packet: &Packet, hop: Hop) -> Result<()> {
        let destination = packet.destination_hash();
        let (shared, link_events, proof, events) = {
            let mut state = self.lock();
            let id = link_id_for(&destination, &packet.payload);
            if state.links.contains_key(&id) {
                return Err(MeshError::invalid_packet(format!("Link {} already exists", id)));
            }
            let local = state
                .destinations
                .get(&destination)
                .ok_or_else(|| MeshError::invalid_packet(format!("{} is not a local destination", destination)))?;
            let (shared, link_events, proof) = LinkShared::accept(&local.destination, &packet.payload, hop)?;
            let events = local.events.clone();
            state.links.insert(shared.id(), shared.clone());
            (shared, link_events, proof, events)
        };

        let reply = Packet::new(PacketType::LinkProof, *shared.id().as_bytes(), proof)?;
        if let Err(e) = self.send_to_hop(&reply, hop).await {
            self.lock().links.remove(&shared.id());
            return Err(e);
        }

        debug!("Link {} established on {}", shared.id(), destination);
        let _ = events.send(DestinationEvent::LinkEstablished {
            link: Link::new(shared, self.clone()),
            events: link_events,
        });
        Ok(())
    }

    fn handle_link_proof(&self, packet: &Packet) -> Result<()> {
        let link = self.find_link(&packet.link_id())?;
        link.complete(&packet.payload)?;
        debug!("Link {} established", link.id());
        Ok(())
    }

    fn handle_link_data(&self, packet: &Packet) -> Result<()> {
        let link = self.find_link(&packet.link_id())?;
        let data = link.decrypt_inbound(&packet.payload)?;
        link.deliver(data, packet.hash());
        Ok(())
    }

    fn handle_keepalive(&self, packet: &Packet) -> Result<()> {
        let link = self.find_link(&packet.link_id())?;
        link.decrypt_inbound(&packet.payload)?;
        trace!("Keep-alive on link {}", link.id());
        Ok(())
    }

    fn handle_link_close(&self, packet: &Packet) -> Result<()> {
        let link = self.find_link(&packet.link_id())?;
        let body = link.decrypt_inbound(&packet.payload)?;
        if body.as_slice() != link.id().as_bytes() {
            return Err(MeshError::invalid_packet("Link close does not name the link"));
        }
        self.lock().links.remove(&link.id());
        if link.mark_closed(link.remote_close_reason()) {
            debug!("Link {} closed by peer", link.id());
        }
        Ok(())
    }

    async fn handle_path_request(&self, packet: &Packet, hop: Hop) -> Result<()> {
        let requested = packet.destination_hash();
        let payload = {
            let state = self.lock();
            match state.destinations.get(&requested) {
                Some(local) => local.destination.announce_payload(&local.app_data)?,
                None => return Ok(()),
            }
        };

        let response = Packet::new(PacketType::Announce, *requested.as_bytes(), payload)?
            .with_context(PacketContext::PathResponse);
        self.send_to_hop(&response, hop).await?;
        debug!("Answered path request for {} from {}", requested, hop.addr);
        Ok(())
    }

    fn handle_proof(&self, packet: &Packet) -> Result<()> {
        let hash = PacketHash::new(packet.address);
        if packet.payload.len() != SIGNATURE_SIZE {
            return Err(MeshError::invalid_packet("Proof has the wrong length"));
        }
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&packet.payload);

        let mut state = self.lock();
        let identity = match state.receipts.get(&hash) {
            Some(pending) => pending.identity,
            None => return Ok(()),
        };
        identity.verify(hash.as_bytes(), &signature)?;
        if let Some(pending) = state.receipts.remove(&hash) {
            let _ = pending.proved.send(());
            debug!("Packet {} was delivered", hash);
        }
        Ok(())
    }

    // ---- Maintenance ----

    async fn maintain(&self) {
        let now = Instant::now();
        let (keepalives, expired) = {
            let mut state = self.lock();
            if !state.running {
                return;
            }
            state.receipts.retain(|_, receipt| receipt.deadline > now);

            let mut keepalives = Vec::new();
            let mut expired = Vec::new();
            for link in state.links.values() {
                match link.upkeep(now, &self.config.link) {
                    LinkUpkeep::SendKeepAlive => keepalives.push(link.clone()),
                    LinkUpkeep::Expire => expired.push(link.clone()),
                    LinkUpkeep::Nothing => {}
                }
            }
            for link in &expired {
                state.links.remove(&link.id());
            }
            (keepalives, expired)
        };

        for link in expired {
            if link.mark_closed(TeardownReason::Timeout) {
                debug!("Link {} timed out", link.id());
            }
        }

        for link in keepalives {
            let sent = match link.encrypt_outbound(&[]) {
                Ok(payload) => match Packet::new(PacketType::KeepAlive, *link.id().as_bytes(), payload) {
                    Ok(packet) => self.send_to_hop(&packet, link.hop()).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                debug!("Could not send keep-alive on link {}: {}", link.id(), e);
            }
        }
    }
}

async fn receive_loop(stack: Weak<StackInner>, index: InterfaceId, interface: Arc<UdpInterface>) {
    loop {
        let received = interface.recv().await;
        let Some(stack) = stack.upgrade() else {
            break;
        };
        match received {
            Ok((bytes, addr)) => {
                stack
                    .handle_datagram(&bytes, Hop { interface: index, addr })
                    .await;
            }
            Err(e) => warn!("Receive error on interface {}: {}", interface.name(), e),
        }
    }
}

async fn maintenance_loop(stack: Weak<StackInner>) {
    let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(stack) = stack.upgrade() else {
            break;
        };
        stack.maintain().await;
    }
}

// ----------------------------------------------------------------------------
// Stack Handle
// ----------------------------------------------------------------------------

/// Running networking stack. Clones share the same stack.
#[derive(Clone)]
pub struct Stack {
    inner: Arc<StackInner>,
}

impl Stack {
    /// Bind interfaces, load known destinations and start background tasks
    pub async fn start(config: StackConfig) -> Result<Self> {
        config.validate()?;

        let mut interfaces = Vec::with_capacity(config.interfaces.len());
        for interface_config in &config.interfaces {
            interfaces.push(Arc::new(UdpInterface::bind(interface_config).await?));
        }

        let known = match config.known_destinations_path() {
            Some(path) => KnownDestinations::load(&path).unwrap_or_else(|e| {
                warn!("Could not load known destinations from {}: {}", path.display(), e);
                KnownDestinations::new()
            }),
            None => KnownDestinations::new(),
        };
        debug!("Loaded {} known destinations", known.len());

        let inner = Arc::new(StackInner {
            config,
            interfaces,
            state: Mutex::new(StackState {
                running: true,
                destinations: HashMap::new(),
                known,
                paths: HashMap::new(),
                links: HashMap::new(),
                receipts: HashMap::new(),
                seen: PacketCache::default(),
            }),
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::with_capacity(inner.interfaces.len() + 1);
        for (index, interface) in inner.interfaces.iter().enumerate() {
            tasks.push(tokio::spawn(receive_loop(
                Arc::downgrade(&inner),
                index,
                interface.clone(),
            )));
        }
        tasks.push(tokio::spawn(maintenance_loop(Arc::downgrade(&inner))));
        *inner.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks;

        info!("Stack started with {} interface(s)", inner.interfaces.len());
        Ok(Self { inner })
    }

    pub fn config(&self) -> &StackConfig {
        &self.inner.config
    }

    /// Broadcast listen addresses of all interfaces
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .interfaces
            .iter()
            .filter_map(|interface| interface.local_addr().ok())
            .collect()
    }

    /// Add a broadcast target to every interface
    pub fn add_forward(&self, addr: SocketAddr) {
        for interface in &self.inner.interfaces {
            interface.add_forward(addr);
        }
    }

    /// Start accepting links and packets for an inbound destination
    pub fn register_destination(&self, destination: &Destination) -> Result<DestinationEvents> {
        if destination.direction() != Direction::In {
            return Err(MeshError::WrongDirection(
                destination.hash(),
                "only inbound destinations can be registered",
            ));
        }

        let mut state = self.inner.lock();
        if !state.running {
            return Err(MeshError::Shutdown);
        }
        if state.destinations.contains_key(&destination.hash()) {
            return Err(MeshError::AlreadyRegistered(destination.hash()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.destinations.insert(
            destination.hash(),
            LocalDestination {
                destination: destination.clone(),
                app_data: Vec::new(),
                events: sender,
            },
        );
        debug!("Registered destination {}", destination);
        Ok(DestinationEvents { receiver })
    }

    /// Broadcast a signed announce for an inbound destination
    pub async fn announce(&self, destination: &Destination, app_data: Option<&[u8]>) -> Result<()> {
        let app_data = app_data.unwrap_or_default();
        let payload = destination.announce_payload(app_data)?;
        if let Some(local) = self.inner.lock().destinations.get_mut(&destination.hash()) {
            local.app_data = app_data.to_vec();
        }

        let packet = Packet::new(PacketType::Announce, *destination.hash().as_bytes(), payload)?;
        self.inner.broadcast(&packet).await?;
        debug!("Announced {}", destination.hash());
        Ok(())
    }

    pub fn has_path(&self, destination: &DestinationHash) -> bool {
        self.inner.lock().paths.contains_key(destination)
    }

    pub fn hops_to(&self, destination: &DestinationHash) -> Option<u8> {
        self.inner.lock().paths.get(destination).map(|path| path.hops)
    }

    /// Ask the network for an announce of `destination`
    pub async fn request_path(&self, destination: &DestinationHash) -> Result<()> {
        let mut tag = [0u8; TRUNCATED_HASH_BYTES];
        OsRng.fill_bytes(&mut tag);
        let packet = Packet::new(PacketType::PathRequest, *destination.as_bytes(), tag.to_vec())?;
        self.inner.broadcast(&packet).await?;
        debug!("Requested path to {}", destination);
        Ok(())
    }

    /// Identity that announced `destination`
    pub fn recall(&self, destination: &DestinationHash) -> Option<Identity> {
        self.inner.lock().known.recall(destination)
    }

    pub fn recall_app_data(&self, destination: &DestinationHash) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .known
            .recall_app_data(destination)
            .map(<[u8]>::to_vec)
    }

    /// Request a link to an outbound destination with a known path. The link
    /// starts pending; [`crate::LinkEvent::Established`] follows once the
    /// destination proves it.
    pub async fn open_link(&self, destination: &Destination) -> Result<(Link, LinkEvents)> {
        if destination.direction() != Direction::Out {
            return Err(MeshError::WrongDirection(
                destination.hash(),
                "links can only be opened to outbound destinations",
            ));
        }
        let hop = self
            .inner
            .lock()
            .paths
            .get(&destination.hash())
            .map(|path| path.hop)
            .ok_or(MeshError::NoPath(destination.hash()))?;

        let (shared, events, request) = LinkShared::initiate(destination, hop)?;
        let packet = Packet::new(PacketType::LinkRequest, *destination.hash().as_bytes(), request)?;
        self.inner.lock().links.insert(shared.id(), shared.clone());

        if let Err(e) = self.inner.send_to_hop(&packet, hop).await {
            self.inner.lock().links.remove(&shared.id());
            return Err(e);
        }
        debug!("Requested link {} to {}", shared.id(), destination.hash());
        Ok((Link::new(shared, self.inner.clone()), events))
    }

    /// Send one sealed packet to an outbound destination
    pub async fn send_packet(&self, destination: &Destination, data: &[u8]) -> Result<PacketReceipt> {
        if destination.direction() != Direction::Out {
            return Err(MeshError::WrongDirection(
                destination.hash(),
                "packets can only be sent to outbound destinations",
            ));
        }
        if data.len() > PACKET_MDU {
            return Err(MeshError::PayloadTooLarge {
                size: data.len(),
                max: PACKET_MDU,
            });
        }
        let hop = self
            .inner
            .lock()
            .paths
            .get(&destination.hash())
            .map(|path| path.hop)
            .ok_or(MeshError::NoPath(destination.hash()))?;

        let sealed = crypto::seal(destination.identity().encryption_key(), data)?;
        let packet = Packet::new(PacketType::Data, *destination.hash().as_bytes(), sealed)?;
        let hash = packet.hash();
        let timeout = self.inner.config.receipt_timeout();

        let (sender, receiver) = oneshot::channel();
        self.inner.lock().receipts.insert(
            hash,
            PendingReceipt {
                identity: *destination.identity(),
                proved: sender,
                deadline: Instant::now() + timeout,
            },
        );

        if let Err(e) = self.inner.send_to_hop(&packet, hop).await {
            self.inner.lock().receipts.remove(&hash);
            return Err(e);
        }
        Ok(PacketReceipt {
            hash,
            proved: receiver,
            timeout,
        })
    }

    /// Close all links, persist known destinations and stop background tasks
    pub async fn shutdown(&self) -> Result<()> {
        let (links, known) = {
            let mut state = self.inner.lock();
            if !state.running {
                return Ok(());
            }
            let links: Vec<_> = state.links.values().cloned().collect();
            state.receipts.clear();
            (links, state.known.clone())
        };

        for link in &links {
            self.inner.close_link(link).await;
        }

        {
            let mut state = self.inner.lock();
            state.running = false;
            state.destinations.clear();
        }

        for task in self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }

        if let Some(path) = self.inner.config.known_destinations_path() {
            known.save(&path)?;
            debug!("Saved {} known destinations to {}", known.len(), path.display());
        }
        info!("Stack shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("interfaces", &self.inner.interfaces.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrivateIdentity;
    use crate::interface::InterfaceConfig;
    use crate::link::LinkEvent;

    async fn loopback_stack() -> Stack {
        Stack::start(StackConfig::with_interfaces(vec![InterfaceConfig::new(
            "loopback",
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Vec::new(),
        )]))
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_repeated_link_request_keeps_existing_link() {
        let stack = loopback_stack().await;
        let identity = Arc::new(PrivateIdentity::generate());
        let destination = Destination::inbound(identity, "example_utilities", &["linkexample"]).unwrap();
        let mut events = stack.register_destination(&destination).unwrap();

        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let hop = Hop {
            interface: 0,
            addr: peer.local_addr().unwrap(),
        };
        let remote = Destination::outbound(*destination.identity(), "example_utilities", &["linkexample"]).unwrap();
        let (initiator, _initiator_events, request) = LinkShared::initiate(&remote, hop).unwrap();
        let request = Packet::new(PacketType::LinkRequest, *destination.hash().as_bytes(), request).unwrap();

        stack.inner.handle_link_request(&request, hop).await.unwrap();
        let (link, mut link_events) = match events.recv().await.unwrap() {
            DestinationEvent::LinkEstablished { link, events } => (link, events),
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(link.id(), initiator.id());

        // Same bytes again, as if the packet cache had forgotten them
        assert!(stack.inner.handle_link_request(&request, hop).await.is_err());
        assert!(events.receiver.try_recv().is_err());

        let mut buffer = vec![0u8; crate::packet::MTU];
        let (len, _) = peer.recv_from(&mut buffer).await.unwrap();
        let proof = Packet::decode(&buffer[..len]).unwrap();
        initiator.complete(&proof.payload).unwrap();

        let payload = initiator.encrypt_outbound(b"still here").unwrap();
        let data = Packet::new(PacketType::LinkData, *initiator.id().as_bytes(), payload).unwrap();
        stack.inner.handle_link_data(&data).unwrap();

        assert_eq!(link_events.recv().await.unwrap(), LinkEvent::Established);
        match link_events.recv().await.unwrap() {
            LinkEvent::Packet { data, .. } => assert_eq!(data, b"still here"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(link.is_active());
        stack.shutdown().await.unwrap();
    }
}
