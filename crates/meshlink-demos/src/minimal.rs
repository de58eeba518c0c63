//! Minimal example: start the stack, create a destination and announce it
//! whenever the user hits enter

use std::future::Future;
use std::sync::Arc;

use meshlink_core::{Destination, DestinationEvent, DestinationEvents, PrivateIdentity, ProofStrategy, Stack};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::{DemoError, Result, APP_NAME};

pub const MINIMAL_ASPECT: &str = "minimalsample";

pub struct MinimalNode {
    stack: Stack,
    destination: Destination,
    events: DestinationEvents,
}

impl MinimalNode {
    /// Create a fresh identity and register a destination that proves every
    /// packet it receives
    pub fn new(stack: Stack) -> Result<Self> {
        let identity = PrivateIdentity::generate();
        println!("{}", identity);

        let mut destination = Destination::inbound(Arc::new(identity), APP_NAME, &[MINIMAL_ASPECT])?;
        destination.set_proof_strategy(ProofStrategy::ProveAll);
        let events = stack.register_destination(&destination)?;

        Ok(Self {
            stack,
            destination,
            events,
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Announce on every input line until `shutdown` resolves. End of input
    /// stops reading but the destination stays reachable.
    pub async fn run<R, F>(&mut self, input: R, shutdown: F) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let hash = self.destination.hash();
        info!(
            "Minimal example {} running, hit enter to manually send an announce (Ctrl-C to quit)",
            hash
        );

        let mut lines = input.lines();
        let mut input_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
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
                    DestinationEvent::Packet { data, packet } => {
                        info!("Received {} bytes in packet {}", data.len(), packet);
                    }
                    DestinationEvent::LinkEstablished { link, .. } => {
                        debug!("Ignoring link {} to the minimal destination", link);
                        link.teardown().await;
                    }
                },
            }
        }
        Ok(())
    }
}
