//! Rewrites a model artifact into its canonical current form: legacy layer
//! parameters stripped, training-only attributes dropped, and the result
//! verified before success is reported. Unlike [`patch`](crate::patch),
//! conversion writes a fresh output and never creates a backup; the input
//! is not touched.

use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::{
	artifact::{ArtifactError, ModelArtifact, MODEL_CONFIG_ATTR},
	config,
	patch::{strip_legacy, PatchError},
};

/// Attributes only meaningful to the training toolchain. Inference
/// runtimes ignore them, and current export formats no longer carry them.
pub const TRAINING_ATTRS: &[&str] = &["training_config"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertReport {
	/// Number of legacy parameters removed.
	pub fixed_count: usize,
	/// Training-only attributes that were present and dropped.
	pub dropped_attrs: Vec<String>,
	pub output_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
	#[error(transparent)]
	Patch(#[from] PatchError),

	#[error("converted artifact failed verification: {reason}")]
	Verify { reason: String },
}

/// Convert `input` into a canonical artifact at `output`.
///
/// After writing, the output is re-opened and verified: its architecture
/// description must decode and load cleanly, and every weight blob must be
/// byte-identical to the input's. Conversion never reports success for an
/// artifact it cannot prove equivalent.
///
/// # Errors
///
/// Returns an error under the same conditions as
/// [`patch`](crate::patch::patch) (missing input, no architecture
/// description, undecodable description, unwritable output), or when the
/// written output fails verification.
pub fn convert(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<ConvertReport, ConvertError> {
	let (input, output) = (input.as_ref(), output.as_ref());

	if !input.exists() {
		return Err(PatchError::NotFound {
			path: input.to_path_buf(),
		}
		.into());
	}

	let original = ModelArtifact::open(input).map_err(PatchError::Artifact)?;
	let config_json = original.attr(MODEL_CONFIG_ATTR).ok_or(PatchError::MissingConfig)?;
	let mut tree: Value = serde_json::from_str(config_json).map_err(PatchError::Decode)?;

	let fixed_count = strip_legacy(&mut tree);

	let mut converted = original.clone();
	converted.set_attr(
		MODEL_CONFIG_ATTR,
		serde_json::to_string(&tree).map_err(PatchError::Decode)?,
	);

	let mut dropped_attrs = Vec::new();
	for attr in TRAINING_ATTRS {
		if converted.remove_attr(attr).is_some() {
			dropped_attrs.push((*attr).to_string());
		}
	}

	converted.save(output).map_err(|e| match e {
		ArtifactError::Io(source) => PatchError::Write {
			path: output.to_path_buf(),
			source,
		},
		other => PatchError::Artifact(other),
	})?;

	verify(&original, output)?;

	Ok(ConvertReport {
		fixed_count,
		dropped_attrs,
		output_path: output.to_path_buf(),
	})
}

fn verify(original: &ModelArtifact, output: &Path) -> Result<(), ConvertError> {
	let fail = |reason: String| ConvertError::Verify { reason };

	let converted = ModelArtifact::open(output).map_err(|e| fail(e.to_string()))?;

	let config_json = converted
		.attr(MODEL_CONFIG_ATTR)
		.ok_or_else(|| fail("architecture description is missing".to_string()))?;
	let tree: Value = serde_json::from_str(config_json).map_err(|e| fail(e.to_string()))?;
	config::ensure_loadable(&tree).map_err(|e| fail(e.to_string()))?;

	for (name, blob) in original.entries() {
		match converted.entry(name) {
			Some(copied) if copied == blob => {},
			Some(_) => return Err(fail(format!("weight entry `{name}` differs from the input"))),
			None => return Err(fail(format!("weight entry `{name}` is missing"))),
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn legacy_artifact() -> ModelArtifact {
		let config = json!({
			"class_name": "Sequential",
			"config": {
				"layers": [
					{"class_name": "DepthwiseConv2D", "config": {"name": "dw1", "groups": 1}},
					{"class_name": "Dense", "config": {"name": "dense_1", "units": 3}},
				],
			},
		});

		let mut artifact = ModelArtifact::new();
		artifact.set_attr(MODEL_CONFIG_ATTR, serde_json::to_string(&config).unwrap());
		artifact.set_attr("training_config", r#"{"optimizer":"adam"}"#);
		artifact.set_attr("keras_version", "2.4.0");
		artifact.insert_entry("dw1/depthwise_kernel", vec![9, 9, 9]);

		artifact
	}

	#[test]
	fn strips_legacy_params_and_training_attrs() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("keras_model.mach");
		legacy_artifact().save(&input).unwrap();
		let output = dir.path().join("keras_model_converted.mach");

		let report = convert(&input, &output).unwrap();

		assert_eq!(report.fixed_count, 1);
		assert_eq!(report.dropped_attrs, ["training_config"]);

		let converted = ModelArtifact::open(&output).unwrap();
		assert_eq!(converted.attr("training_config"), None);
		assert_eq!(converted.attr("keras_version"), Some("2.4.0"));
		assert_eq!(converted.entry("dw1/depthwise_kernel"), Some([9, 9, 9].as_slice()));

		let tree: Value = serde_json::from_str(converted.attr(MODEL_CONFIG_ATTR).unwrap()).unwrap();
		assert!(config::ensure_loadable(&tree).is_ok());
	}

	#[test]
	fn conversion_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("keras_model.mach");
		legacy_artifact().save(&input).unwrap();
		let once = dir.path().join("once.mach");
		let twice = dir.path().join("twice.mach");

		assert_eq!(convert(&input, &once).unwrap().fixed_count, 1);

		let report = convert(&once, &twice).unwrap();
		assert_eq!(report.fixed_count, 0);
		assert!(report.dropped_attrs.is_empty());
		assert_eq!(std::fs::read(&once).unwrap(), std::fs::read(&twice).unwrap());
	}

	#[test]
	fn missing_input_is_not_found() {
		let dir = tempfile::tempdir().unwrap();

		let err = convert(dir.path().join("nope.mach"), dir.path().join("out.mach")).unwrap_err();
		assert!(matches!(err, ConvertError::Patch(PatchError::NotFound { .. })));
	}

	#[test]
	fn does_not_back_up_or_modify_the_input() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("keras_model.mach");
		legacy_artifact().save(&input).unwrap();
		let before = std::fs::read(&input).unwrap();

		convert(&input, dir.path().join("out.mach")).unwrap();

		assert_eq!(std::fs::read(&input).unwrap(), before);
		assert!(!crate::patch::backup_path_for(&input).exists());
	}
}
