//! Desk controller running against an emulated desk, display and platform.

mod actuator;
mod config;
mod console;
mod display;
mod platform;
mod runtime;
mod signals;

use std::path::PathBuf;

use clap::Parser;
use embassy_executor::Spawner;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "desk-emulator", about = "Remote desk controller with emulated hardware")]
struct Cli {
    /// Config file; defaults to `$HOME/desk.toml`.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Do not read operator commands from stdin.
    #[arg(long)]
    no_console: bool,
    /// Height in centimetres the emulated desk starts at.
    #[arg(long, value_name = "CM")]
    start_height: Option<f32>,
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let options = runtime::Options {
        config: cli.config.unwrap_or_else(config::default_config_path),
        console: !cli.no_console,
        start_height_cm: cli.start_height,
    };
    if let Err(err) = runtime::run(spawner, options).await {
        error!("{err:#}");
        std::process::exit(1);
    }
    std::process::exit(0);
}
