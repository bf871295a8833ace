//! Daisy host entry point.
//!
//! ```text
//! daisy-host                         Run in the foreground
//! daisy-host --config <path>         Load a custom config TOML
//! daisy-host --gen-config            Write default config to stdout
//! daisy-host --pairing-code 123456   Register a fixed pairing code
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use daisy_host::config::HostConfig;
use daisy_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "daisy-host", about = "Daisy second-screen host service")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "daisy-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Register this pairing code at startup instead of generating one.
    #[arg(long)]
    pairing_code: Option<String>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = HostConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("daisy-host v{}", env!("CARGO_PKG_VERSION"));
    info!("capture service: {}", config.capture_service.address);
    info!("session capacity: {}", config.health.capacity);

    let mut service = HostService::new(config);
    if let Some(code) = cli.pairing_code {
        service = service.with_pairing_code(code);
    }
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}
