//! Repairs model artifacts whose architecture description newer runtimes
//! refuse to load. The weights are never touched: the patcher rewrites the
//! serialized layer tree, strips the offending parameters, and writes a new
//! artifact whose every other byte matches the input.

use serde_json::Value;
use std::{
	ffi::OsStr,
	fs, io,
	path::{Path, PathBuf},
};

use crate::{
	artifact::{self, ArtifactError, ModelArtifact, MODEL_CONFIG_ATTR},
	config,
};

/// Appended to the input path to derive the backup path.
pub const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchResult {
	/// Number of legacy parameters removed. Zero means the artifact was
	/// already compatible.
	pub fixed_count: usize,
	pub backup_path: PathBuf,
	pub output_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
	#[error("model artifact not found at {}", .path.display())]
	NotFound { path: PathBuf },

	#[error("artifact has no `{MODEL_CONFIG_ATTR}` attribute; there is nothing to patch")]
	MissingConfig,

	#[error("architecture description does not parse: {0}")]
	Decode(#[source] serde_json::Error),

	#[error(transparent)]
	Artifact(#[from] ArtifactError),

	#[error("failed to write {}: {}", .path.display(), .source)]
	Write {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Rewrite `input`'s architecture description so current runtimes accept
/// it, writing the result to `output`.
///
/// A byte-identical backup of the input is created at `<input>.backup`
/// first, unless one already exists; an existing backup is never
/// overwritten. The input itself is never modified. Weight blobs and every
/// attribute other than the architecture description pass through
/// byte-for-byte, and re-running on an already-patched artifact succeeds
/// with `fixed_count == 0` and an output byte-identical to the input.
///
/// # Errors
///
/// Returns an error if the input is missing or not a valid artifact, has
/// no architecture description, the description does not parse, or the
/// backup or output cannot be written. No partial file is left at the
/// output path on failure.
pub fn patch(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<PatchResult, PatchError> {
	let (input, output) = (input.as_ref(), output.as_ref());

	if !input.exists() {
		return Err(PatchError::NotFound {
			path: input.to_path_buf(),
		});
	}

	let backup_path = backup_path_for(input);
	if !backup_path.exists() {
		fs::copy(input, &backup_path).map_err(|source| PatchError::Write {
			path: backup_path.clone(),
			source,
		})?;
	}

	let bytes = fs::read(input).map_err(|e| PatchError::Artifact(ArtifactError::Io(e)))?;
	let mut patched = ModelArtifact::from_bytes(&bytes)?;

	let config_json = patched.attr(MODEL_CONFIG_ATTR).ok_or(PatchError::MissingConfig)?;
	let mut tree: Value = serde_json::from_str(config_json).map_err(PatchError::Decode)?;

	let fixed_count = strip_legacy(&mut tree);

	if fixed_count == 0 {
		// Already compatible. The output is still produced, as a
		// byte-identical copy of the input.
		artifact::write_atomic(output, &bytes).map_err(|source| PatchError::Write {
			path: output.to_path_buf(),
			source,
		})?;
	} else {
		patched.set_attr(
			MODEL_CONFIG_ATTR,
			serde_json::to_string(&tree).map_err(PatchError::Decode)?,
		);
		patched.save(output).map_err(|e| match e {
			ArtifactError::Io(source) => PatchError::Write {
				path: output.to_path_buf(),
				source,
			},
			other => PatchError::Artifact(other),
		})?;
	}

	Ok(PatchResult {
		fixed_count,
		backup_path,
		output_path: output.to_path_buf(),
	})
}

/// Remove every legacy parameter from matching layer definitions,
/// returning the number removed. Recurses into every mapping value and
/// sequence element, since composite layers nest further layer
/// definitions inside their own config.
pub(crate) fn strip_legacy(node: &mut Value) -> usize {
	let mut fixed = 0;

	match node {
		Value::Object(map) => {
			let class = map.get("class_name").and_then(Value::as_str).map(ToString::to_string);
			if let Some(class) = class {
				for (legacy_class, param) in config::LEGACY_PARAMS {
					if class != *legacy_class {
						continue;
					}

					if let Some(Value::Object(layer_config)) = map.get_mut("config") {
						if layer_config.remove(*param).is_some() {
							fixed += 1;
						}
					}
				}
			}

			for value in map.values_mut() {
				fixed += strip_legacy(value);
			}
		},
		Value::Array(items) => {
			for item in items {
				fixed += strip_legacy(item);
			}
		},
		_ => {},
	}

	fixed
}

/// The backup path for `input`: the same path with [`BACKUP_SUFFIX`]
/// appended.
#[must_use]
pub fn backup_path_for(input: &Path) -> PathBuf {
	let mut path = input.as_os_str().to_owned();
	path.push(BACKUP_SUFFIX);

	PathBuf::from(path)
}

/// The conventional output path for `input`: `model.mach` becomes
/// `model_fixed.mach`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
	let stem = input.file_stem().and_then(OsStr::to_str).unwrap_or("model");
	let name = match input.extension().and_then(OsStr::to_str) {
		Some(ext) => format!("{stem}_fixed.{ext}"),
		None => format!("{stem}_fixed"),
	};

	input.with_file_name(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::path::Path;
	use tempfile::TempDir;

	fn sequential_config() -> Value {
		json!({
			"class_name": "Sequential",
			"config": {
				"name": "sequential_1",
				"layers": [
					{"class_name": "DepthwiseConv2D", "config": {"name": "dw1", "groups": 1, "kernel_size": [3, 3]}},
					{"class_name": "Dense", "config": {"name": "dense_1", "units": 3, "groups": 7}},
				],
			},
		})
	}

	fn write_artifact(dir: &TempDir, config: &Value) -> std::path::PathBuf {
		let mut artifact = ModelArtifact::new();
		artifact.set_attr(MODEL_CONFIG_ATTR, serde_json::to_string(config).unwrap());
		artifact.set_attr("keras_version", "2.4.0");
		artifact.insert_entry("dw1/depthwise_kernel", vec![1, 2, 3, 4, 5]);
		artifact.insert_entry("dense_1/kernel", vec![6, 7, 8]);

		let path = dir.path().join("keras_model.mach");
		artifact.save(&path).unwrap();

		path
	}

	fn decode_config(path: &Path) -> Value {
		let artifact = ModelArtifact::open(path).unwrap();
		serde_json::from_str(artifact.attr(MODEL_CONFIG_ATTR).unwrap()).unwrap()
	}

	#[test]
	fn removes_groups_from_depthwise_layers() {
		let dir = tempfile::tempdir().unwrap();
		let input = write_artifact(&dir, &sequential_config());
		let output = dir.path().join("keras_model_fixed.mach");

		let result = patch(&input, &output).unwrap();
		assert_eq!(result.fixed_count, 1);

		let tree = decode_config(&output);
		let layers = tree["config"]["layers"].as_array().unwrap();
		assert_eq!(
			layers[0],
			json!({"class_name": "DepthwiseConv2D", "config": {"name": "dw1", "kernel_size": [3, 3]}})
		);
		// `groups` on a non-depthwise layer is untouched.
		assert_eq!(layers[1]["config"]["groups"], json!(7));
	}

	#[test]
	fn fixes_nested_composite_layers() {
		let dir = tempfile::tempdir().unwrap();
		let config = json!({
			"class_name": "Sequential",
			"config": {
				"layers": [{
					"class_name": "Sequential",
					"config": {
						"layers": [
							{"class_name": "DepthwiseConv2D", "config": {"name": "inner_dw", "groups": 1}},
							{"class_name": "DepthwiseConv2D", "config": {"name": "inner_dw2", "groups": 1}},
						],
					},
				}],
			},
		});
		let input = write_artifact(&dir, &config);
		let output = dir.path().join("out.mach");

		let result = patch(&input, &output).unwrap();

		assert_eq!(result.fixed_count, 2);
		assert!(config::find_legacy_params(&decode_config(&output)).is_empty());
	}

	#[test]
	fn preserves_weight_blobs_and_other_attrs() {
		let dir = tempfile::tempdir().unwrap();
		let input = write_artifact(&dir, &sequential_config());
		let output = dir.path().join("out.mach");

		patch(&input, &output).unwrap();

		let before = ModelArtifact::open(&input).unwrap();
		let after = ModelArtifact::open(&output).unwrap();
		for (name, blob) in before.entries() {
			assert_eq!(after.entry(name), Some(blob), "weight entry `{name}` changed");
		}
		assert_eq!(after.attr("keras_version"), Some("2.4.0"));
	}

	#[test]
	fn compatible_artifact_is_copied_verbatim() {
		let dir = tempfile::tempdir().unwrap();
		let config = json!({
			"class_name": "Sequential",
			"config": {"layers": [{"class_name": "Dense", "config": {"units": 3}}]},
		});
		let input = write_artifact(&dir, &config);
		let output = dir.path().join("out.mach");

		let result = patch(&input, &output).unwrap();

		assert_eq!(result.fixed_count, 0);
		assert_eq!(fs::read(&input).unwrap(), fs::read(&output).unwrap());
	}

	#[test]
	fn patching_twice_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let input = write_artifact(&dir, &sequential_config());
		let once = dir.path().join("once.mach");
		let twice = dir.path().join("twice.mach");

		assert_eq!(patch(&input, &once).unwrap().fixed_count, 1);
		assert_eq!(patch(&once, &twice).unwrap().fixed_count, 0);

		assert_eq!(fs::read(&once).unwrap(), fs::read(&twice).unwrap());
	}

	#[test]
	fn creates_backup_once_and_never_overwrites_it() {
		let dir = tempfile::tempdir().unwrap();
		let input = write_artifact(&dir, &sequential_config());
		let original = fs::read(&input).unwrap();
		let output = dir.path().join("out.mach");

		let result = patch(&input, &output).unwrap();
		assert_eq!(fs::read(&result.backup_path).unwrap(), original);

		// A pre-existing backup survives a second run untouched.
		fs::write(&result.backup_path, b"sentinel").unwrap();
		patch(&input, &output).unwrap();
		assert_eq!(fs::read(&result.backup_path).unwrap(), b"sentinel");
	}

	#[test]
	fn missing_input_is_not_found() {
		let dir = tempfile::tempdir().unwrap();

		let err = patch(dir.path().join("nope.mach"), dir.path().join("out.mach")).unwrap_err();
		assert!(matches!(err, PatchError::NotFound { .. }));
	}

	#[test]
	fn artifact_without_config_is_missing_config() {
		let dir = tempfile::tempdir().unwrap();
		let mut artifact = ModelArtifact::new();
		artifact.insert_entry("dense/kernel", vec![1, 2, 3]);
		let input = dir.path().join("bare.mach");
		artifact.save(&input).unwrap();

		let err = patch(&input, dir.path().join("out.mach")).unwrap_err();
		assert!(matches!(err, PatchError::MissingConfig));
	}

	#[test]
	fn unparseable_config_is_decode_error() {
		let dir = tempfile::tempdir().unwrap();
		let mut artifact = ModelArtifact::new();
		artifact.set_attr(MODEL_CONFIG_ATTR, "{not json");
		let input = dir.path().join("garbled.mach");
		artifact.save(&input).unwrap();

		let err = patch(&input, dir.path().join("out.mach")).unwrap_err();
		assert!(matches!(err, PatchError::Decode(_)));
	}

	#[test]
	fn derives_backup_and_output_paths() {
		assert_eq!(
			backup_path_for(Path::new("models/keras_model.mach")),
			Path::new("models/keras_model.mach.backup")
		);
		assert_eq!(
			default_output_path(Path::new("models/keras_model.mach")),
			Path::new("models/keras_model_fixed.mach")
		);
		assert_eq!(default_output_path(Path::new("model")), Path::new("model_fixed"));
	}
}
