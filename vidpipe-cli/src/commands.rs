//! CLI command handling.

use clap::Subcommand;
use vidpipe_core::VidpipeConfig;
use vidpipe_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to bind (overrides VIDPIPE_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Console log level
        #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
        log_level: CliLogLevel,
    },
}

pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve { port, log_level } => {
            init_tracing(log_level.as_tracing_level())
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

            let mut config = VidpipeConfig::from_env();
            if let Some(port) = port {
                config.http.port = port;
            }

            tracing::info!("starting vidpipe server on port {}", config.http.port);
            vidpipe_web::run_server(config)
                .await
                .map_err(|e| anyhow::anyhow!("server error: {e}"))
        }
    }
}
