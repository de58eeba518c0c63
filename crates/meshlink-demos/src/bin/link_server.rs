//! Link example server: accepts links and answers every message

use clap::Parser;
use tracing::error;

use meshlink_demos::{
    app,
    cli::ServerArgs,
    server::{load_or_create_identity, LinkServer},
    terminal, Result,
};

#[tokio::main]
async fn main() {
    terminal::banner("Server Startup");
    let args = ServerArgs::parse();

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    let stack = app::bootstrap(&args.common).await?;
    let identity = load_or_create_identity(&args.identity)?;
    let mut server = LinkServer::new(stack.clone(), identity)?;

    let served = server.run(terminal::stdin(), app::ctrl_c()).await;
    stack.shutdown().await?;
    served
}
