use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Remove legacy layer parameters that newer runtimes reject
	Fix {
		/// Model artifact to repair
		#[clap(default_value = "keras_model.mach")]
		input: PathBuf,

		/// Where to write the repaired artifact (default: `<input>_fixed`)
		#[clap(short, long)]
		output: Option<PathBuf>,
	},

	/// Rewrite an artifact into its canonical current form
	Convert {
		/// Model artifact to convert
		#[clap(default_value = "keras_model.mach")]
		input: PathBuf,

		/// Where to write the converted artifact (default: `<input>_converted`)
		#[clap(short, long)]
		output: Option<PathBuf>,
	},

	/// Print an artifact's attributes, entries, and layer summary
	Inspect {
		/// Model artifact to inspect
		#[clap(default_value = "keras_model.mach")]
		input: PathBuf,
	},

	/// Send an image to a running server and print the classification
	Predict {
		/// Image file to classify
		image: PathBuf,

		/// Server to send the image to
		#[clap(long, default_value = "http://localhost:5000")]
		host: String,

		/// Ask the server to persist the result to its prediction store
		#[clap(long)]
		store: bool,
	},
}

mod convert;
mod fix;
mod inspect;
mod predict;

pub async fn exec(command: Command) -> Result<()> {
	match command {
		Command::Fix { input, output } => fix::handle(&input, output),
		Command::Convert { input, output } => convert::handle(&input, output),
		Command::Inspect { input } => inspect::handle(&input),
		Command::Predict { image, host, store } => predict::handle(&image, &host, store).await,
	}
}
