//! UDP interfaces
//!
//! Each interface owns two sockets. The shared socket binds the configured
//! listen address with address and port reuse, so every stack on a host can
//! hear broadcasts on the same port. The unicast socket binds an ephemeral
//! port on the same IP; all outgoing packets leave from it, so replies to a
//! particular peer reach that peer's stack alone.

use std::net::SocketAddr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::packet::MTU;
use crate::{MeshError, Result};

/// Index of an interface within the stack
pub type InterfaceId = usize;

/// Where a peer was heard from: the interface and the remote socket address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub interface: InterfaceId,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Name used in log output
    pub name: String,
    /// Local address to bind
    pub listen: SocketAddr,
    /// Addresses that receive broadcasts (announces, path requests)
    #[serde(default)]
    pub forward: Vec<SocketAddr>,
}

impl InterfaceConfig {
    pub fn new<S: Into<String>>(name: S, listen: SocketAddr, forward: Vec<SocketAddr>) -> Self {
        Self {
            name: name.into(),
            listen,
            forward,
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: "Default UDP Interface".to_string(),
            listen: SocketAddr::from(([0, 0, 0, 0], 4242)),
            forward: vec![SocketAddr::from(([255, 255, 255, 255], 4242))],
        }
    }
}

// ----------------------------------------------------------------------------
// UDP Interface
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct UdpInterface {
    name: String,
    shared: UdpSocket,
    unicast: UdpSocket,
    forward: RwLock<Vec<SocketAddr>>,
}

/// Bind the broadcast listener so several stacks can share its port
fn bind_shared(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

impl UdpInterface {
    pub async fn bind(config: &InterfaceConfig) -> Result<Self> {
        let bind_error = |addr: SocketAddr, e: std::io::Error| {
            MeshError::config(format!("Could not bind interface {} to {}: {}", config.name, addr, e))
        };

        let shared = bind_shared(config.listen).map_err(|e| bind_error(config.listen, e))?;
        let unicast_addr = SocketAddr::new(config.listen.ip(), 0);
        let unicast = UdpSocket::bind(unicast_addr)
            .await
            .map_err(|e| bind_error(unicast_addr, e))?;
        unicast.set_broadcast(true)?;
        debug!(
            "Interface {} listening on {}, sending from {}",
            config.name,
            shared.local_addr()?,
            unicast.local_addr()?
        );

        Ok(Self {
            name: config.name.clone(),
            shared,
            unicast,
            forward: RwLock::new(config.forward.clone()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the shared broadcast listener
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.local_addr()?)
    }

    /// Address peers see as the source of our packets
    pub fn unicast_addr(&self) -> Result<SocketAddr> {
        Ok(self.unicast.local_addr()?)
    }

    pub fn add_forward(&self, addr: SocketAddr) {
        let mut forward = self
            .forward
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !forward.contains(&addr) {
            forward.push(addr);
        }
    }

    fn forward_addrs(&self) -> Vec<SocketAddr> {
        self.forward
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Send to every forward address; individual failures are logged
    pub async fn broadcast(&self, bytes: &[u8]) {
        for addr in self.forward_addrs() {
            if let Err(e) = self.unicast.send_to(bytes, addr).await {
                warn!("Interface {} could not send to {}: {}", self.name, addr, e);
            }
        }
    }

    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        self.unicast.send_to(bytes, addr).await?;
        Ok(())
    }

    /// Receive one datagram from either socket; buffers hold one MTU plus a
    /// byte so oversize datagrams are detectable
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut shared = vec![0u8; MTU + 1];
        let mut unicast = vec![0u8; MTU + 1];
        let (len, addr, from_shared) = tokio::select! {
            received = self.shared.recv_from(&mut shared) => {
                let (len, addr) = received?;
                (len, addr, true)
            }
            received = self.unicast.recv_from(&mut unicast) => {
                let (len, addr) = received?;
                (len, addr, false)
            }
        };
        let mut buffer = if from_shared { shared } else { unicast };
        buffer.truncate(len);
        Ok((buffer, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> InterfaceConfig {
        InterfaceConfig::new("test", SocketAddr::from(([127, 0, 0, 1], 0)), Vec::new())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_forward_addresses() {
        let a = UdpInterface::bind(&loopback()).await.unwrap();
        let b = UdpInterface::bind(&loopback()).await.unwrap();
        a.add_forward(b.local_addr().unwrap());
        a.add_forward(b.local_addr().unwrap());

        a.broadcast(b"ping").await;
        let (bytes, from) = b.recv().await.unwrap();
        assert_eq!(bytes, b"ping");
        assert_eq!(from, a.unicast_addr().unwrap());
        assert_eq!(a.forward_addrs().len(), 1);
    }

    #[tokio::test]
    async fn test_replies_reach_the_unicast_socket() {
        let a = UdpInterface::bind(&loopback()).await.unwrap();
        let b = UdpInterface::bind(&loopback()).await.unwrap();

        b.send_to(b"reply", a.unicast_addr().unwrap()).await.unwrap();
        let (bytes, from) = a.recv().await.unwrap();
        assert_eq!(bytes, b"reply");
        assert_eq!(from, b.unicast_addr().unwrap());
    }

    #[tokio::test]
    async fn test_interfaces_share_a_listen_port() {
        let a = UdpInterface::bind(&loopback()).await.unwrap();
        let same_port = InterfaceConfig::new("second", a.local_addr().unwrap(), Vec::new());
        let b = UdpInterface::bind(&same_port).await.unwrap();
        assert_eq!(a.local_addr().unwrap(), b.local_addr().unwrap());
        assert_ne!(a.unicast_addr().unwrap(), b.unicast_addr().unwrap());
    }

    #[tokio::test]
    async fn test_unusable_address_is_config_error() {
        let foreign = InterfaceConfig::new("foreign", SocketAddr::from(([192, 0, 2, 1], 0)), Vec::new());
        let err = UdpInterface::bind(&foreign).await.unwrap_err();
        assert!(matches!(err, MeshError::Config(_)));
    }

    #[test]
    fn test_default_interface_broadcasts() {
        let config = InterfaceConfig::default();
        assert_eq!(config.listen.port(), 4242);
        assert_eq!(config.forward, vec![SocketAddr::from(([255, 255, 255, 255], 4242))]);
    }
}
