use anyhow::Result;
use clap::{Parser, Subcommand};
use postline_backend::cli;
use postline_backend::config::PostlineConfig;
use postline_backend::node::PostlineNode;
use postline_backend::telemetry::{self, LogTarget};
use postline_backend::utils;

#[derive(Parser)]
#[command(author, version, about = "Postline post service and CLI")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the HTTP server (Axum) for REST access
    Serve,
    /// Start the interactive CLI for posting and searching
    Cli,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Cli);

    utils::print_banner();
    telemetry::init_tracing(match command {
        Command::Serve => LogTarget::Server,
        Command::Cli => LogTarget::Interactive,
    });

    let config = PostlineConfig::from_env()?;
    let node = PostlineNode::start(config).await?;
    tracing::info!("bootstrap complete");

    match command {
        Command::Serve => node.run_http_server().await,
        Command::Cli => cli::run_cli(node.snapshot()).await,
    }
}
