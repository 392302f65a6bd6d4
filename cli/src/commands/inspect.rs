use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

use machina_core::{
	artifact::{ModelArtifact, MODEL_CONFIG_ATTR},
	config,
};

pub fn handle(input: &Path) -> Result<()> {
	let artifact =
		ModelArtifact::open(input).with_context(|| format!("failed to open {}", input.display()))?;

	println!("Attributes:");
	for (name, value) in artifact.attrs() {
		println!("  {name} ({} bytes)", value.len());
	}

	println!();
	println!("Entries:");
	for (name, blob) in artifact.entries() {
		println!("  {name} ({} bytes)", blob.len());
	}

	let Some(config_json) = artifact.attr(MODEL_CONFIG_ATTR) else {
		println!();
		println!("No architecture description found.");
		return Ok(());
	};
	let tree: Value =
		serde_json::from_str(config_json).context("architecture description does not parse")?;

	println!();
	println!("Layers:");
	for layer in config::summarize(&tree) {
		println!(
			"  {} ({}, {} parameters)",
			layer.name.as_deref().unwrap_or("unnamed"),
			layer.class_name,
			layer.params,
		);
	}

	println!();
	match config::ensure_loadable(&tree) {
		Ok(()) => println!("The model loads cleanly under current runtimes."),
		Err(error) => println!("Incompatible: {error}"),
	}

	Ok(())
}
