//! KTS calendar server entry point

use anyhow::Context;
use clap::Parser;
use kts_calendar::{CalendarConfig, CalendarServer};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "kts-calendar")]
#[command(about = "Keyless timestamping calendar service", long_about = None)]
struct Cli {
    /// Configuration file; a default one is written if missing
    #[arg(default_value = "calendar.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = if cli.config.exists() {
        CalendarConfig::from_file(&cli.config)
            .with_context(|| format!("Failed to load {}", cli.config.display()))?
    } else {
        let config = CalendarConfig::default();
        config.to_file(&cli.config)?;
        eprintln!("Default configuration saved to {}", cli.config.display());
        config
    };

    let server = CalendarServer::new(config)?;
    server.run().await?;

    Ok(())
}
