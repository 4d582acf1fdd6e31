//! Vidpipe CLI - Command-line interface
//!
//! Provides command-line access to the Vidpipe server.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "vidpipe")]
#[command(about = "A resilient video download server")]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::handle_command(cli.command).await?;

    Ok(())
}
