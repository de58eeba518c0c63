//! Link example client: relays terminal input over a link to a server

use clap::{CommandFactory, Parser};
use tracing::{debug, error, info};

use meshlink_demos::{
    app,
    cli::ClientArgs,
    client::{self, EXIT_DELAY},
    terminal, DemoError, Result,
};

#[tokio::main]
async fn main() {
    terminal::banner("Client Startup");
    let args = ClientArgs::parse();

    let Some(destination) = args.destination.clone() else {
        println!();
        if let Err(e) = ClientArgs::command().print_help() {
            eprintln!("{}", e);
        }
        println!();
        return;
    };

    if let Err(e) = run(&args, &destination).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: &ClientArgs, destination: &str) -> Result<()> {
    let stack = app::bootstrap(&args.common).await?;

    let destination = match client::parse_destination(destination) {
        Ok(hash) => hash,
        Err(DemoError::InvalidDestination(reason)) => {
            debug!("{}", reason);
            info!("Invalid destination entered. Check your input!");
            stack.shutdown().await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    client::wait_for_path(&stack, &destination, stack.config().path_request_interval()).await?;
    let (link, mut events) = client::connect(&stack, &destination).await?;

    if client::wait_for_link(&mut events).await?.is_none() {
        client::client_loop(&link, &mut events, terminal::stdin(), app::ctrl_c()).await?;
    }

    stack.shutdown().await?;
    tokio::time::sleep(EXIT_DELAY).await;
    Ok(())
}
