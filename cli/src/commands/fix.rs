use anyhow::Result;
use std::path::{Path, PathBuf};

use machina_core::patch::{self, PatchResult};

pub fn handle(input: &Path, output: Option<PathBuf>) -> Result<()> {
	let output = output.unwrap_or_else(|| patch::default_output_path(input));

	println!("Patching {}...", input.display());
	let PatchResult {
		fixed_count,
		backup_path,
		output_path,
	} = patch::patch(input, output)?;

	println!("Backup kept at {}", backup_path.display());

	if fixed_count == 0 {
		println!("No legacy parameters found. The model may already be fixed.");
	} else {
		println!("Removed {fixed_count} legacy parameter(s).");
	}

	println!("Wrote {}", output_path.display());
	println!("Replace the original artifact with the fixed one to use it.");

	Ok(())
}
