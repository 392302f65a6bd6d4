#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use clap::Parser;

mod commands;

/// Inspect, repair, and query model artifacts
#[derive(Parser)]
#[clap(name = "machina", version)]
struct Cli {
	#[clap(subcommand)]
	command: commands::Command,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	if let Err(error) = commands::exec(cli.command).await {
		eprintln!("Error: {error:?}");
		std::process::exit(1);
	}
}
