use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
	collections::BTreeMap,
	fs, io,
	path::{Path, PathBuf},
};

/// Attribute holding the serialized architecture description.
pub const MODEL_CONFIG_ATTR: &str = "model_config";

const MAGIC: [u8; 4] = *b"MACH";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
	#[error("model artifact not found at {}", .path.display())]
	NotFound { path: PathBuf },

	#[error("not a model artifact (bad magic bytes)")]
	BadMagic,

	#[error("unsupported artifact format version {found} (current is {VERSION})")]
	UnsupportedVersion { found: u32 },

	#[error("artifact is truncated")]
	Truncated,

	#[error("malformed artifact index: {0}")]
	CorruptIndex(#[source] serde_json::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Index {
	attrs: BTreeMap<String, String>,
	entries: Vec<EntryMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
	name: String,
	offset: u64,
	len: u64,
}

/// A serialized model: named binary entries (weight blobs) plus
/// string-valued metadata attributes, one of which holds the
/// architecture description.
///
/// The on-disk layout is `magic | version | index length | index (JSON) |
/// payload`. Attributes are kept sorted and entries keep their insertion
/// order, so writing an unchanged artifact reproduces it byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelArtifact {
	attrs: BTreeMap<String, String>,
	entries: IndexMap<String, Vec<u8>>,
}

impl ModelArtifact {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Read an artifact from disk.
	///
	/// # Errors
	///
	/// Returns an error if the file is missing, unreadable, or not a valid
	/// artifact.
	pub fn open(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
		let path = path.as_ref();
		let bytes = fs::read(path).map_err(|e| {
			if e.kind() == io::ErrorKind::NotFound {
				ArtifactError::NotFound {
					path: path.to_path_buf(),
				}
			} else {
				ArtifactError::Io(e)
			}
		})?;

		Self::from_bytes(&bytes)
	}

	/// Decode an artifact from its serialized form.
	///
	/// # Errors
	///
	/// Returns an error if the bytes are not a valid artifact.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
		if bytes.len() < HEADER_LEN {
			return Err(ArtifactError::Truncated);
		}

		if bytes[..4] != MAGIC {
			return Err(ArtifactError::BadMagic);
		}

		let version = u32::from_le_bytes(bytes[4..8].try_into().map_err(|_| ArtifactError::Truncated)?);
		if version != VERSION {
			return Err(ArtifactError::UnsupportedVersion { found: version });
		}

		let index_len = u64::from_le_bytes(bytes[8..16].try_into().map_err(|_| ArtifactError::Truncated)?);
		let index_end = HEADER_LEN
			.checked_add(usize::try_from(index_len).map_err(|_| ArtifactError::Truncated)?)
			.ok_or(ArtifactError::Truncated)?;

		if bytes.len() < index_end {
			return Err(ArtifactError::Truncated);
		}

		let index: Index =
			serde_json::from_slice(&bytes[HEADER_LEN..index_end]).map_err(ArtifactError::CorruptIndex)?;

		let payload = &bytes[index_end..];
		let mut entries = IndexMap::with_capacity(index.entries.len());
		for meta in index.entries {
			let start = usize::try_from(meta.offset).map_err(|_| ArtifactError::Truncated)?;
			let end = start
				.checked_add(usize::try_from(meta.len).map_err(|_| ArtifactError::Truncated)?)
				.ok_or(ArtifactError::Truncated)?;
			let blob = payload.get(start..end).ok_or(ArtifactError::Truncated)?;

			entries.insert(meta.name, blob.to_vec());
		}

		Ok(Self {
			attrs: index.attrs,
			entries,
		})
	}

	/// Serialize the artifact.
	///
	/// # Errors
	///
	/// Returns an error if the index cannot be encoded.
	pub fn to_bytes(&self) -> Result<Vec<u8>, ArtifactError> {
		let mut metas = Vec::with_capacity(self.entries.len());
		let mut offset = 0u64;
		for (name, blob) in &self.entries {
			metas.push(EntryMeta {
				name: name.clone(),
				offset,
				len: blob.len() as u64,
			});
			offset += blob.len() as u64;
		}

		let index = serde_json::to_vec(&Index {
			attrs: self.attrs.clone(),
			entries: metas,
		})
		.map_err(ArtifactError::CorruptIndex)?;

		let mut bytes = Vec::with_capacity(HEADER_LEN + index.len() + offset as usize);
		bytes.extend_from_slice(&MAGIC);
		bytes.extend_from_slice(&VERSION.to_le_bytes());
		bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
		bytes.extend_from_slice(&index);
		for blob in self.entries.values() {
			bytes.extend_from_slice(blob);
		}

		Ok(bytes)
	}

	/// Write the artifact to disk, atomically: the bytes land in a sibling
	/// temp file first and are renamed into place, so an interrupted write
	/// never leaves a partial artifact at `path`.
	///
	/// # Errors
	///
	/// Returns an error if the artifact cannot be encoded or written.
	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
		write_atomic(path.as_ref(), &self.to_bytes()?)?;

		Ok(())
	}

	#[must_use]
	pub fn attr(&self, name: &str) -> Option<&str> {
		self.attrs.get(name).map(String::as_str)
	}

	pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.attrs.insert(name.into(), value.into());
	}

	pub fn remove_attr(&mut self, name: &str) -> Option<String> {
		self.attrs.remove(name)
	}

	pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
		self.attrs.iter().map(|(name, value)| (name.as_str(), value.as_str()))
	}

	#[must_use]
	pub fn entry(&self, name: &str) -> Option<&[u8]> {
		self.entries.get(name).map(Vec::as_slice)
	}

	pub fn insert_entry(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
		self.entries.insert(name.into(), bytes);
	}

	pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
		self.entries.iter().map(|(name, blob)| (name.as_str(), blob.as_slice()))
	}
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(".tmp");
	let tmp = PathBuf::from(tmp);

	fs::write(&tmp, bytes)?;
	fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> ModelArtifact {
		let mut artifact = ModelArtifact::new();
		artifact.set_attr(MODEL_CONFIG_ATTR, r#"{"class_name":"Sequential","config":{"layers":[]}}"#);
		artifact.set_attr("keras_version", "2.4.0");
		artifact.insert_entry("dw1/depthwise_kernel", vec![1, 2, 3, 4]);
		artifact.insert_entry("dense/kernel", vec![5, 6, 7]);

		artifact
	}

	#[test]
	fn round_trips_attrs_and_entries() {
		let artifact = sample();
		let decoded = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();

		assert_eq!(decoded, artifact);
		assert_eq!(decoded.attr("keras_version"), Some("2.4.0"));
		assert_eq!(decoded.entry("dense/kernel"), Some([5, 6, 7].as_slice()));
	}

	#[test]
	fn serialization_is_deterministic() {
		let artifact = sample();
		let bytes = artifact.to_bytes().unwrap();
		let reencoded = ModelArtifact::from_bytes(&bytes).unwrap().to_bytes().unwrap();

		assert_eq!(bytes, reencoded);
	}

	#[test]
	fn save_leaves_no_temp_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.mach");

		sample().save(&path).unwrap();

		assert!(path.exists());
		let residue: Vec<_> = fs::read_dir(dir.path())
			.unwrap()
			.filter_map(|entry| {
				let name = entry.unwrap().file_name();
				name.to_str().unwrap().ends_with(".tmp").then_some(name)
			})
			.collect();
		assert!(residue.is_empty(), "temp files left behind: {residue:?}");
	}

	#[test]
	fn open_missing_file_is_not_found() {
		let dir = tempfile::tempdir().unwrap();

		let err = ModelArtifact::open(dir.path().join("nope.mach")).unwrap_err();
		assert!(matches!(err, ArtifactError::NotFound { .. }));
	}

	#[test]
	fn rejects_bad_magic() {
		let mut bytes = sample().to_bytes().unwrap();
		bytes[..4].copy_from_slice(b"HDF5");

		assert!(matches!(
			ModelArtifact::from_bytes(&bytes),
			Err(ArtifactError::BadMagic)
		));
	}

	#[test]
	fn rejects_unknown_version() {
		let mut bytes = sample().to_bytes().unwrap();
		bytes[4..8].copy_from_slice(&9u32.to_le_bytes());

		assert!(matches!(
			ModelArtifact::from_bytes(&bytes),
			Err(ArtifactError::UnsupportedVersion { found: 9 })
		));
	}

	#[test]
	fn rejects_truncated_payload() {
		let bytes = sample().to_bytes().unwrap();

		assert!(matches!(
			ModelArtifact::from_bytes(&bytes[..bytes.len() - 2]),
			Err(ArtifactError::Truncated)
		));
	}

	#[test]
	fn rejects_corrupt_index() {
		let artifact = sample();
		let index_len = {
			let bytes = artifact.to_bytes().unwrap();
			u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize
		};

		let mut bytes = artifact.to_bytes().unwrap();
		bytes[HEADER_LEN..HEADER_LEN + index_len].fill(b'!');

		assert!(matches!(
			ModelArtifact::from_bytes(&bytes),
			Err(ArtifactError::CorruptIndex(_))
		));
	}
}
