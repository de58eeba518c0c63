//! Program startup shared by the binaries

use meshlink_core::{Stack, StackConfig};
use tracing::debug;

use crate::cli::CommonArgs;
use crate::logging::{setup_logging, DEFAULT_LOG_LEVEL};
use crate::Result;

/// Load the configuration, install logging and start the stack
pub async fn bootstrap(common: &CommonArgs) -> Result<Stack> {
    let config = match StackConfig::load(common.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            setup_logging(common.verbose, DEFAULT_LOG_LEVEL);
            return Err(e.into());
        }
    };
    setup_logging(common.verbose, &config.log_level);
    if let Some(dir) = &config.config_dir {
        debug!("Using configuration in {}", dir.display());
    }

    Ok(Stack::start(config).await?)
}

/// Resolves when the user presses Ctrl-C
pub async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler the program only ends through its own loop
        std::future::pending::<()>().await;
    }
}
