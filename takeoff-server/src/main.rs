mod cli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    takeoff_server::init_tracing();

    cli::Cli::parse().run().await
}
