//! Plant monitor system binary
use anyhow::Context;
use clap::Parser;
use log::info;
use pitaya::components::prelude::*;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Plant Monitor Component.
    #[arg(short, long)]
    filepath: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    let config = PlantMonitorConfig::from_file(&args.filepath)
        .with_context(|| format!("Failed to load config {}", args.filepath))?;

    let stop_signal = Arc::new(AtomicBool::new(false));
    let worker_stop = stop_signal.clone();
    // The devices are opened on the worker so they never cross threads.
    let mut station = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut monitor =
            FieldPlantMonitor::from_config(config).context("Failed to start the field station")?;
        PlantMonitorController::start(&mut monitor, worker_stop);
        Ok(())
    });

    tokio::select! {
        finished = &mut station => return finished?,
        interrupt = tokio::signal::ctrl_c() => {
            interrupt.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, finishing the current plant...");
            stop_signal.store(true, Ordering::Relaxed);
        }
    }
    station.await?
}
