//! Link example, client side
//!
//! Finds a path to the server destination, opens a link and relays lines
//! typed at the terminal over it until the user quits or the link closes.

use std::future::Future;
use std::time::Duration;

use meshlink_core::{
    Destination, DestinationHash, Link, LinkEvent, LinkEvents, MeshError, Stack, TeardownReason, LINK_MDU,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::server::LINK_ASPECT;
use crate::terminal::prompt;
use crate::{DemoError, Result, APP_NAME};

/// How often the path table is checked while waiting for a path
pub const PATH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after the link closes so the close can reach the server
pub const EXIT_DELAY: Duration = Duration::from_millis(1500);

// ----------------------------------------------------------------------------
// Input Handling
// ----------------------------------------------------------------------------

/// Parse the destination given on the command line
pub fn parse_destination(text: &str) -> Result<DestinationHash> {
    DestinationHash::from_hex(text).map_err(|e| match e {
        MeshError::InvalidHash(reason) => DemoError::InvalidDestination(reason),
        other => other.into(),
    })
}

/// What to do with one line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    Empty,
    Send(Vec<u8>),
    /// Encoded size exceeds the link MDU
    TooLarge(usize),
}

pub fn classify_input(line: &str) -> Input {
    if matches!(line.to_lowercase().as_str(), "quit" | "q" | "exit") {
        return Input::Quit;
    }
    if line.is_empty() {
        return Input::Empty;
    }
    let data = line.as_bytes().to_vec();
    if data.len() > LINK_MDU {
        Input::TooLarge(data.len())
    } else {
        Input::Send(data)
    }
}

/// Log line for a closed link
pub fn closed_message(reason: TeardownReason) -> &'static str {
    match reason {
        TeardownReason::Timeout => "The link timed out, exiting now.",
        TeardownReason::DestinationClosed => "The link was closed by the server, exiting now.",
        TeardownReason::InitiatorClosed => "Link closed, exiting now.",
    }
}

// ----------------------------------------------------------------------------
// Connection Setup
// ----------------------------------------------------------------------------

/// Request a path if none is known and wait for the announce, asking again
/// every `retry` until it arrives
pub async fn wait_for_path(stack: &Stack, destination: &DestinationHash, retry: Duration) -> Result<()> {
    if stack.has_path(destination) {
        return Ok(());
    }

    info!("Destination is not yet known. Requesting path and waiting for announce to arrive...");
    stack.request_path(destination).await?;
    let mut last_request = Instant::now();

    while !stack.has_path(destination) {
        println!("Waiting for path...");
        tokio::time::sleep(PATH_POLL_INTERVAL).await;
        if last_request.elapsed() >= retry {
            debug!("Repeating path request for {}", destination);
            stack.request_path(destination).await?;
            last_request = Instant::now();
        }
    }
    Ok(())
}

/// Build the server destination from the recalled identity and open a link
pub async fn connect(stack: &Stack, destination: &DestinationHash) -> Result<(Link, LinkEvents)> {
    let identity = stack
        .recall(destination)
        .ok_or(DemoError::UnknownIdentity(*destination))?;

    info!("Establishing link with server...");
    let server = Destination::outbound(identity, APP_NAME, &[LINK_ASPECT])?;
    if server.hash() != *destination {
        return Err(DemoError::InvalidDestination(format!(
            "{} is not a {}.{} destination",
            destination, APP_NAME, LINK_ASPECT
        )));
    }
    Ok(stack.open_link(&server).await?)
}

/// Wait for the link to become active. Returns the teardown reason if it
/// closed first.
pub async fn wait_for_link(events: &mut LinkEvents) -> Result<Option<TeardownReason>> {
    info!("Waiting for server link to become active.");
    loop {
        match events.recv().await.ok_or(DemoError::EventsClosed)? {
            LinkEvent::Established => {
                info!("Link established with server, enter some text to send, or \"quit\" to quit");
                return Ok(None);
            }
            LinkEvent::Closed(reason) => {
                info!("{}", closed_message(reason));
                return Ok(Some(reason));
            }
            LinkEvent::Packet { packet, .. } => debug!("Packet {} arrived before the link was active", packet),
        }
    }
}

// ----------------------------------------------------------------------------
// Client Loop
// ----------------------------------------------------------------------------

/// Relay input lines over `link` until it closes. Quitting, end of input and
/// `shutdown` all tear the link down; the loop ends on the resulting close.
pub async fn client_loop<R, F>(link: &Link, events: &mut LinkEvents, input: R, shutdown: F) -> Result<TeardownReason>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    let mut should_quit = false;
    tokio::pin!(shutdown);
    prompt();

    loop {
        tokio::select! {
            _ = &mut shutdown, if !should_quit => {
                println!();
                should_quit = true;
                link.teardown().await;
            }
            line = lines.next_line(), if !should_quit => {
                let Some(line) = line? else {
                    should_quit = true;
                    link.teardown().await;
                    continue;
                };
                match classify_input(&line) {
                    Input::Quit => {
                        should_quit = true;
                        link.teardown().await;
                        continue;
                    }
                    Input::Empty => {}
                    Input::TooLarge(size) => info!(
                        "Cannot send this packet, the data size of {} bytes exceeds the link packet MDU of {} bytes.",
                        size, LINK_MDU
                    ),
                    Input::Send(data) => {
                        if let Err(e) = link.send(&data).await {
                            info!("Error while sending data over the link: {}", e);
                            should_quit = true;
                            link.teardown().await;
                            continue;
                        }
                    }
                }
                prompt();
            }
            event = events.recv() => match event.ok_or(DemoError::EventsClosed)? {
                LinkEvent::Packet { data, packet } => {
                    let text = String::from_utf8_lossy(&data);
                    info!("Received data on the link: {}. (Packet: {})", text, packet);
                    prompt();
                }
                LinkEvent::Closed(reason) => {
                    info!("{}", closed_message(reason));
                    return Ok(reason);
                }
                LinkEvent::Established => {}
            },
        }
    }
}
