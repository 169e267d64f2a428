//! Main entry point for the booking service.
//!
//! Loads the configuration, assembles the booking engine from the
//! implementations compiled into the workspace and runs it next to the HTTP
//! query surface.

use booking_config::Config;
use booking_core::{BookingBuilder, BookingFactories};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod server;

/// Command-line arguments for the booking service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config/booking.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started booking service");

	let config_path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Configuration path is not valid UTF-8: {:?}", args.config))?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = BookingBuilder::new(config.clone()).build(BookingFactories::from_registries())?;
	let engine = Arc::new(engine);

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			tokio::select! {
				result = engine.run() => {
					tracing::info!("Booking engine finished");
					result?;
				}
				result = server::start_server(api_config, Arc::clone(&engine)) => {
					tracing::info!("API server finished");
					result?;
				}
			}
		},
		None => {
			tracing::info!("API disabled, running engine only");
			engine.run().await?;
		},
	}

	tracing::info!("Stopped booking service");
	Ok(())
}
