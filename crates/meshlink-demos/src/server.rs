//! Link example, server side
//!
//! Accepts links on `example_utilities.linkexample`. Every message received
//! on any link is answered on the link of the most recently connected
//! client.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use meshlink_core::{
    Destination, DestinationEvent, DestinationEvents, Link, LinkEvent, LinkEvents, PrivateIdentity, Stack,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{DemoError, Result, APP_NAME};

pub const LINK_ASPECT: &str = "linkexample";

/// Load the server identity, creating and saving one if the file is missing
pub fn load_or_create_identity(path: &Path) -> Result<PrivateIdentity> {
    if path.exists() {
        return Ok(PrivateIdentity::from_file(path)?);
    }
    let identity = PrivateIdentity::generate();
    identity.to_file(path)?;
    info!("Created new server identity {} in {}", identity, path.display());
    Ok(identity)
}

/// Text sent back for every received message
pub fn reply_text(message: &str, link: &Link) -> String {
    format!("I received  [{}] over the link {}.", message, link)
}

/// Forward one link's events into the server-wide channel until it closes
fn watch_link(link: Link, mut events: LinkEvents, sink: mpsc::UnboundedSender<(Link, LinkEvent)>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let closed = matches!(event, LinkEvent::Closed(_));
            if sink.send((link.clone(), event)).is_err() || closed {
                break;
            }
        }
    });
}

pub struct LinkServer {
    stack: Stack,
    destination: Destination,
    events: DestinationEvents,
    latest_client_link: Option<Link>,
}

impl LinkServer {
    pub fn new(stack: Stack, identity: PrivateIdentity) -> Result<Self> {
        let destination = Destination::inbound(Arc::new(identity), APP_NAME, &[LINK_ASPECT])?;
        let events = stack.register_destination(&destination)?;
        Ok(Self {
            stack,
            destination,
            events,
            latest_client_link: None,
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Serve clients and announce on every input line until `shutdown`
    /// resolves
    pub async fn run<R, F>(&mut self, input: R, shutdown: F) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let hash = self.destination.hash();
        info!("Link example running with hash {}, waiting for a connection.", hash);
        info!("Hit enter to manually send an announce (Ctrl-C to quit)");

        let (link_sink, mut link_events) = mpsc::unbounded_channel();
        let mut lines = input.lines();
        let mut input_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("CTRL + C from keyboard, exiting.");
                    break;
                }
                line = lines.next_line(), if input_open => match line? {
                    Some(_) => {
                        self.stack.announce(&self.destination, None).await?;
                        info!("Sent announce from {}", hash);
                    }
                    None => {
                        debug!("Input closed, still serving {}", hash);
                        input_open = false;
                    }
                },
                event = self.events.recv() => match event.ok_or(DemoError::EventsClosed)? {
                    DestinationEvent::LinkEstablished { link, events } => {
                        info!("Client connected");
                        self.latest_client_link = Some(link.clone());
                        watch_link(link, events, link_sink.clone());
                    }
                    DestinationEvent::Packet { packet, .. } => {
                        debug!("Ignoring single packet {}", packet);
                    }
                },
                Some((link, event)) = link_events.recv() => self.handle_link_event(&link, event).await,
            }
        }
        Ok(())
    }

    async fn handle_link_event(&self, link: &Link, event: LinkEvent) {
        match event {
            LinkEvent::Established => debug!("Link {} is active", link),
            LinkEvent::Packet { data, .. } => {
                let text = String::from_utf8_lossy(&data);
                info!("Received data on the link: {}", text);

                let Some(latest) = &self.latest_client_link else {
                    return;
                };
                let reply = reply_text(&text, latest);
                if let Err(e) = latest.send(reply.as_bytes()).await {
                    warn!("Could not reply over the link {}: {}", latest, e);
                }
            }
            LinkEvent::Closed(reason) => {
                debug!("Link {} closed: {:?}", link, reason);
                info!("Client disconnected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity_file");

        let created = load_or_create_identity(&path).unwrap();
        assert!(path.exists());
        let loaded = load_or_create_identity(&path).unwrap();
        assert_eq!(created.identity(), loaded.identity());
    }

    #[test]
    fn test_corrupt_identity_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity_file");
        std::fs::write(&path, b"not an identity").unwrap();
        assert!(load_or_create_identity(&path).is_err());
    }
}
