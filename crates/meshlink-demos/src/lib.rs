//! meshlink example programs
//!
//! Three small programs built on `meshlink-core`:
//!
//! - `minimal`: creates a destination and announces it on request
//! - `link-server`: accepts links and answers every message it receives
//! - `link-client`: opens a link to a server and relays typed text over it
//!
//! Each program's logic lives in a module here so it can be driven from
//! tests with scripted input instead of a terminal.

pub mod app;
pub mod cli;
pub mod client;
pub mod error;
pub mod logging;
pub mod minimal;
pub mod server;
pub mod terminal;

/// Application namespace shared by all example destinations
pub const APP_NAME: &str = "example_utilities";

pub use error::{DemoError, Result};
