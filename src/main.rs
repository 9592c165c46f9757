//! Board entry point.
//!
//! Runs until killed. With no arguments it reads `config/beam_dash.toml` if present,
//! takes the cloud project from `PROJECT_ID`, claims the configured GPIO pins and
//! the MFRC522 reader, and streams into Bigtable.
//!
//! ```bash
//! PROJECT_ID=my-project beam_dash
//! beam_dash --simulate          # mock hardware, in-memory store
//! ```

use anyhow::{Context, Result};
use beam_dash::clock::SystemClock;
use beam_dash::config::{DashConfig, DEFAULT_CONFIG_PATH};
use beam_dash::{logging, simulate};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "beam_dash")]
#[command(about = "Streams beam-break and RFID events into Bigtable", long_about = None)]
struct Cli {
    /// Configuration file (missing file falls back to defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use mock sensors and an in-memory store instead of real hardware and Bigtable
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DashConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate(!cli.simulate)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        if cli.simulate {
            run_simulated(&config).await
        } else {
            run_board(&config).await
        }
    })
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler: run until killed.
        std::future::pending::<()>().await;
    }
}

async fn run_simulated(config: &DashConfig) -> Result<()> {
    let simulation = simulate::run(config, &SystemClock, shutdown_signal()).await?;
    info!(steps = simulation.steps, "stopped");
    Ok(())
}

#[cfg(feature = "rpi")]
async fn run_board(config: &DashConfig) -> Result<()> {
    use beam_dash::hardware::mfrc522::Mfrc522Reader;
    use beam_dash::hardware::rpi::{self, GpioInput};
    use beam_dash::runner::{self, build_sensors};
    use beam_dash::store::BigtableStore;
    use std::sync::Arc;

    let project_id = config.project_id()?;
    let store = Arc::new(BigtableStore::new(&config.bigtable, project_id)?);

    let gpio = rpi::controller()?;
    let sensors = build_sensors(config, |pin| GpioInput::open(&gpio, pin))?;
    let reader = Mfrc522Reader::open()?;

    let steps = runner::serve(config, store, sensors, reader, &SystemClock, shutdown_signal()).await?;
    info!(steps, "stopped");
    Ok(())
}

#[cfg(not(feature = "rpi"))]
async fn run_board(_config: &DashConfig) -> Result<()> {
    anyhow::bail!("built without GPIO support. Rebuild with --features rpi or pass --simulate")
}
