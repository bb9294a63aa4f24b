//! `clipper` - trim a time window out of a video and re-encode it as MP4
//!
//! # Usage
//!
//! ```bash
//! clipper trim --input talk.mov --start 1:00 --end 2:30.5
//! clipper trim -i talk.mov -s 60 -e 90 -o out.mp4 --fps 30 --json-progress
//! clipper probe --input talk.mov --json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use trimx_retime::app::DefaultAppContainer;
use trimx_retime::cli::{commands, Cli, Commands};
use trimx_retime::utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;
    init_logging(&config.logging);

    info!("Starting clipper {}", env!("CARGO_PKG_VERSION"));
    let container = DefaultAppContainer::libav(config.pipeline).context("Failed to initialize FFmpeg")?;

    let result = match &cli.command {
        Commands::Trim(args) => commands::trim(args, &container).await.map(|_| ()),
        Commands::Probe(args) => commands::probe(args, &container).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
