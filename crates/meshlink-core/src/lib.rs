//! meshlink core networking stack
//!
//! A compact, single-hop, link-oriented networking stack. Nodes own
//! cryptographic identities, expose named destinations, announce them over
//! UDP interfaces, and open encrypted links to each other.
//!
//! The [`Stack`] handle is the entry point: start it from a [`StackConfig`],
//! register inbound [`Destination`]s, announce them, look up paths and open
//! [`Link`]s to remote destinations.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod crypto;
pub mod dedup;
pub mod destination;
pub mod errors;
pub mod identity;
pub mod interface;
pub mod link;
pub mod packet;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{LinkConfig, StackConfig};
pub use destination::{Announce, Destination, DestinationType, Direction, ProofStrategy};
pub use errors::{MeshError, Result};
pub use identity::{Identity, KnownDestinations, PrivateIdentity};
pub use interface::InterfaceConfig;
pub use link::{Link, LinkEvent, LinkEvents, LinkRole, LinkStatus, TeardownReason, LINK_MDU};
pub use packet::{Packet, PacketType, MTU};
pub use transport::{DestinationEvent, DestinationEvents, PacketReceipt, ReceiptStatus, Stack};
pub use types::{
    DestinationHash, IdentityHash, LinkId, PacketHash, Timestamp, TRUNCATED_HASH_LENGTH,
};
