use anyhow::Result;
use mime_guess::Mime;
use schemars::{gen::SchemaGenerator, schema::Schema, JsonSchema};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env::temp_dir, fs::File, path::PathBuf, str::FromStr};
use url::Url;
use uuid::Uuid;

pub use machina_core::spec::{Classifier, ClassifierResponse};

use crate::helpers::base64_decode;

/// An image input, deserialized from an http(s) URL or a data URL and
/// materialized to a temporary file. The file is removed when the value is
/// dropped.
#[derive(Debug)]
pub struct ImageFile(PathBuf);

impl ImageFile {
	/// Create a new image file from a url
	///
	/// # Errors
	///
	/// Returns an error if the url cannot be downloaded or a temporary file cannot be created.
	pub fn new(url: &Url) -> Result<Self> {
		if url.scheme() == "data" {
			return Self::from_dataurl(url);
		}

		tracing::debug!("Downloading image from {url}");
		let file_path = temp_dir().join(url.path().split('/').last().unwrap_or_else(|| url.path()));
		let request = reqwest::blocking::get(url.as_str())?.bytes()?;

		std::io::copy(&mut request.as_ref(), &mut File::create(&file_path)?)?;
		tracing::debug!("Downloaded image to {}", file_path.display());

		Ok(Self(file_path))
	}

	/// Create a new image file from a data url
	///
	/// # Errors
	///
	/// Returns an error if the url cannot be decoded or a temporary file cannot be created.
	pub fn from_dataurl(url: &Url) -> Result<Self> {
		let data = url.path().split(',').last().unwrap_or_else(|| url.path());

		let file_bytes = base64_decode(data)?;
		let mime_type = Mime::from_str(tree_magic_mini::from_u8(&file_bytes))
			.unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM);
		let file_ext = mime_guess::get_mime_extensions(&mime_type)
			.and_then(|extensions| extensions.last())
			.copied()
			.unwrap_or("bin");

		let file_path = temp_dir().join(format!("{}.{file_ext}", Uuid::new_v4()));

		std::fs::write(&file_path, file_bytes)?;
		Ok(Self(file_path))
	}

	/// Decode the image
	///
	/// # Errors
	///
	/// Returns an error if the file cannot be read or is not a supported image format.
	pub fn decode(&self) -> Result<image::DynamicImage> {
		Ok(image::open(&self.0)?)
	}
}

impl AsRef<std::path::Path> for ImageFile {
	fn as_ref(&self) -> &std::path::Path {
		self.0.as_ref()
	}
}

impl JsonSchema for ImageFile {
	fn schema_name() -> String {
		"ImageFile".to_string()
	}

	fn json_schema(gen: &mut SchemaGenerator) -> Schema {
		Url::json_schema(gen)
	}
}

impl Drop for ImageFile {
	fn drop(&mut self) {
		tracing::debug!("Removing temporary image at {:?}", self.0);

		if let Err(e) = std::fs::remove_file(&self.0) {
			tracing::warn!("Failed to remove temporary image at {:?}: {e}", self.0);
		}
	}
}

impl<'de> serde::Deserialize<'de> for ImageFile {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let url = String::deserialize(deserializer)?;

		Self::new(&Url::parse(&url).map_err(serde::de::Error::custom)?)
			.map_err(serde::de::Error::custom)
	}
}

/// What a classifier says about one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
	/// The winning label
	pub label: String,
	/// The winning label's probability
	pub confidence: f64,
	/// Probability per label
	pub probabilities: BTreeMap<String, f64>,
}

impl Classification {
	/// Aggregate per-class scores into a classification: the winning label
	/// is the argmax, and every label keeps its probability.
	///
	/// # Errors
	///
	/// Returns an error if `scores` is empty or doesn't line up with
	/// `labels`.
	pub fn from_scores(labels: &[String], scores: &[f64]) -> Result<Self> {
		if labels.len() != scores.len() {
			anyhow::bail!(
				"got {} scores for {} labels; the labels file doesn't match the model",
				scores.len(),
				labels.len()
			);
		}

		let (best, confidence) = scores
			.iter()
			.copied()
			.enumerate()
			.max_by(|(_, a), (_, b)| a.total_cmp(b))
			.ok_or_else(|| anyhow::anyhow!("the model produced no scores"))?;

		Ok(Self {
			label: labels[best].clone(),
			confidence,
			probabilities: labels.iter().cloned().zip(scores.iter().copied()).collect(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::helpers::base64_encode;
	use serde_json::json;

	fn png_dataurl() -> String {
		let image = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 200, 30]));
		let mut bytes = Vec::new();
		image::DynamicImage::ImageRgb8(image)
			.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
			.unwrap();

		format!("data:image/png;base64,{}", base64_encode(bytes))
	}

	#[test]
	fn dataurl_is_materialized_and_cleaned_up() {
		let url = Url::parse(&png_dataurl()).unwrap();

		let file = ImageFile::from_dataurl(&url).unwrap();
		let path = file.as_ref().to_path_buf();
		assert!(path.exists());

		let image = file.decode().unwrap();
		assert_eq!((image.width(), image.height()), (4, 4));

		drop(file);
		assert!(!path.exists(), "temporary image was not removed");
	}

	#[test]
	fn deserializes_from_a_dataurl_string() {
		#[derive(Debug, serde::Deserialize)]
		struct Input {
			image: ImageFile,
		}

		let input: Input = serde_json::from_value(json!({ "image": png_dataurl() })).unwrap();
		assert!(input.image.as_ref().exists());
	}

	#[test]
	fn from_scores_picks_the_argmax() {
		let labels = ["happy", "sad", "frustrated"].map(String::from);

		let classification = Classification::from_scores(&labels, &[0.1, 0.7, 0.2]).unwrap();

		assert_eq!(classification.label, "sad");
		assert!((classification.confidence - 0.7).abs() < f64::EPSILON);
		assert_eq!(classification.probabilities.len(), 3);
		assert!((classification.probabilities["happy"] - 0.1).abs() < f64::EPSILON);
	}

	#[test]
	fn from_scores_rejects_mismatched_lengths() {
		let labels = ["happy"].map(String::from);

		assert!(Classification::from_scores(&labels, &[0.5, 0.5]).is_err());
		assert!(Classification::from_scores(&[], &[]).is_err());
	}
}
