//! Minimal example: announce a fresh destination on request

use clap::Parser;
use tracing::error;

use meshlink_demos::{app, cli::MinimalArgs, minimal::MinimalNode, terminal, Result};

#[tokio::main]
async fn main() {
    let args = MinimalArgs::parse();

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: MinimalArgs) -> Result<()> {
    let stack = app::bootstrap(&args.common).await?;
    let mut node = MinimalNode::new(stack.clone())?;

    let served = node.run(terminal::stdin(), app::ctrl_c()).await;
    println!();
    stack.shutdown().await?;
    served
}
