//! Class labels, as exported alongside the model: a text file with one
//! `<index> <name>` line per class, in class order.

use std::{fs, io, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum LabelsError {
	#[error("failed to read labels file: {0}")]
	Io(#[from] io::Error),

	#[error("malformed label on line {line}: expected `<index> <name>`")]
	Malformed { line: usize },
}

/// Load class labels from a `labels.txt`-style file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a non-blank line isn't
/// an index followed by a name.
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>, LabelsError> {
	parse_labels(&fs::read_to_string(path)?)
}

/// Parse the contents of a labels file.
///
/// # Errors
///
/// Returns an error if a non-blank line isn't an index followed by a name.
pub fn parse_labels(contents: &str) -> Result<Vec<String>, LabelsError> {
	let mut labels = Vec::new();

	for (i, line) in contents.lines().enumerate() {
		let line = line.trim();
		if line.is_empty() {
			continue;
		}

		let (index, name) = line.split_once(' ').ok_or(LabelsError::Malformed { line: i + 1 })?;
		if index.parse::<usize>().is_err() || name.trim().is_empty() {
			return Err(LabelsError::Malformed { line: i + 1 });
		}

		labels.push(name.trim().to_string());
	}

	Ok(labels)
}
