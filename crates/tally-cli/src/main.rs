// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally::{LocalStore, TallyClient, TallyClientBuilder, TallyConfig};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tally", version, about, long_about = None)]
struct Args {
	/// Path to a configuration file (default: $XDG_CONFIG_HOME/tally/config.toml)
	#[arg(short, long, env = "TALLY_CONFIG")]
	config: Option<PathBuf>,

	/// Project token (overrides config and TALLY_TOKEN)
	#[arg(long)]
	token: Option<String>,

	/// Ingestion API base URL (overrides config and TALLY_BASE_URL)
	#[arg(long)]
	base_url: Option<String>,

	/// Pending-elements store file (overrides config and TALLY_STORE_PATH)
	#[arg(long)]
	store: Option<PathBuf>,

	/// Per-request timeout in seconds
	#[arg(long)]
	timeout: Option<u64>,

	/// Ask the API for verbose error responses
	#[arg(long)]
	verbose: bool,

	/// Do not let the server geolocate from the request IP
	#[arg(long)]
	no_geolocate: bool,

	/// Log level filter, e.g. `debug` or `tally=trace` (overrides RUST_LOG)
	#[arg(short, long)]
	log_level: Option<String>,

	/// Output logs as JSON
	#[arg(long)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Report an event
	Track {
		/// Event name
		name: String,
		/// Distinct ID of the user the event belongs to
		#[arg(short, long)]
		distinct_id: Option<String>,
		/// Event property as key=value; values are parsed as JSON when possible
		#[arg(short, long = "prop")]
		props: Vec<String>,
		/// Store the event for the next flush instead of sending it now
		#[arg(long)]
		queue: bool,
	},
	/// Update a user profile
	Engage {
		/// Distinct ID of the profile
		distinct_id: String,
		/// One of set, set_once, add, append, union, remove, unset, delete
		operation: String,
		/// Property as key=value, or a bare name for `unset`
		#[arg(short, long = "prop")]
		props: Vec<String>,
		/// IP address to attribute the update to
		#[arg(long)]
		ip: Option<String>,
		/// Do not update the profile's last-seen time
		#[arg(long)]
		ignore_time: bool,
	},
	/// Link an alias to a distinct ID
	Alias {
		distinct_id: String,
		alias: String,
	},
	/// Send everything in the local store
	Flush,
	/// Show how many elements are waiting in the local store
	Status {
		/// Print counts as JSON
		#[arg(long)]
		json: bool,
	},
}

fn init_tracing(level: Option<&str>, json: bool) {
	let filter = match level {
		Some(level) => EnvFilter::new(level),
		None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
	};

	if json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().compact().with_writer(std::io::stderr))
			.init();
	}
}

/// Flags win over the environment, which wins over the file.
fn load_config(args: &Args) -> Result<TallyConfig> {
	let base = TallyConfig::load(args.config.as_deref()).context("failed to load configuration")?;

	let overrides = TallyConfig {
		token: args.token.clone(),
		base_url: args.base_url.clone(),
		store_path: args.store.clone(),
		timeout_secs: args.timeout,
		verbose: args.verbose.then_some(true),
		geolocate: args.no_geolocate.then_some(false),
		user_agent: None,
	};

	Ok(base.merge(overrides))
}

fn build_client(config: &TallyConfig) -> Result<TallyClient> {
	TallyClientBuilder::from_config(config)
		.build()
		.context("failed to create client")
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_tracing(args.log_level.as_deref(), args.json_logs);

	let config = load_config(&args)?;
	debug!(
		base_url = config.base_url.as_deref().unwrap_or_default(),
		store = ?config.store_path,
		"configuration loaded"
	);

	// Reading the store needs neither a token nor a base URL.
	if let Command::Status { json } = args.command {
		let store = match &config.store_path {
			Some(path) => LocalStore::file(path),
			None => LocalStore::from_xdg().context("failed to locate the local store")?,
		};
		return commands::status(&store, json).await;
	}

	let client = build_client(&config)?;

	let result = match args.command {
		Command::Track {
			name,
			distinct_id,
			props,
			queue,
		} => commands::track(&client, &name, distinct_id, &props, queue).await,
		Command::Engage {
			distinct_id,
			operation,
			props,
			ip,
			ignore_time,
		} => commands::engage(&client, &distinct_id, &operation, &props, ip, ignore_time).await,
		Command::Alias { distinct_id, alias } => {
			commands::alias(&client, &distinct_id, &alias).await
		}
		Command::Flush => commands::flush(&client).await,
		Command::Status { json } => commands::status(client.store(), json).await,
	};

	client.shutdown().await?;
	result
}
