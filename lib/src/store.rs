//! An append-only log of predictions, kept as a JSON file in a GitHub
//! repository through the contents API: fetch the current snapshot, append
//! one record, and write the file back (creating it if it doesn't exist).

use anyhow::Result;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, env};

use crate::{
	helpers::{base64_decode, base64_encode},
	spec::Classification,
};

const API_BASE: &str = "https://api.github.com";
const DEFAULT_LOG_PATH: &str = "predictions.json";

/// One line of the prediction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
	pub timestamp: DateTime<Utc>,
	pub predicted_label: String,
	pub confidence: f64,
	pub per_label_probabilities: BTreeMap<String, f64>,
}

impl From<&Classification> for PredictionRecord {
	fn from(classification: &Classification) -> Self {
		Self {
			timestamp: Utc::now(),
			predicted_label: classification.label.clone(),
			confidence: classification.confidence,
			per_label_probabilities: classification.probabilities.clone(),
		}
	}
}

pub struct PredictionStore {
	client: Client,
	repo: String,
	path: String,
}

#[derive(Debug, Deserialize)]
struct FileContents {
	content: String,
	sha: String,
}

#[derive(Debug, Serialize)]
struct UpdateFile {
	message: String,
	content: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	sha: Option<String>,
}

impl PredictionStore {
	/// Build a store from the environment: `PREDICTIONS_REPO`
	/// (`owner/repo`), `PREDICTIONS_PATH` (optional) and `GITHUB_TOKEN`.
	///
	/// # Errors
	///
	/// Returns an error if a repository is configured without a token, or
	/// the HTTP client cannot be built.
	pub fn from_env() -> Result<Option<Self>> {
		let Ok(repo) = env::var("PREDICTIONS_REPO") else {
			return Ok(None);
		};

		let token = env::var("GITHUB_TOKEN")
			.map_err(|_| anyhow::anyhow!("GITHUB_TOKEN must be set when PREDICTIONS_REPO is"))?;
		let path = env::var("PREDICTIONS_PATH").unwrap_or_else(|_| DEFAULT_LOG_PATH.to_string());

		Ok(Some(Self::new(&repo, &path, &token)?))
	}

	/// Build a store for `repo` (`owner/repo`), writing to `path`.
	///
	/// # Errors
	///
	/// Returns an error if the HTTP client cannot be built.
	pub fn new(repo: &str, path: &str, token: &str) -> Result<Self> {
		let mut headers = HeaderMap::new();

		let mut authorization = HeaderValue::from_str(&format!("Bearer {token}"))?;
		authorization.set_sensitive(true);
		headers.insert("Authorization", authorization);
		headers.insert("Accept", HeaderValue::from_static("application/vnd.github+json"));

		Ok(Self {
			client: Client::builder()
				.user_agent(format!("machina/{}", env!("CARGO_PKG_VERSION")))
				.default_headers(headers)
				.build()?,
			repo: repo.to_string(),
			path: path.to_string(),
		})
	}

	/// Append one record to the log, creating the file if it doesn't
	/// exist yet. The write carries the prior snapshot's `sha`, so a
	/// concurrent writer makes the request fail instead of losing records.
	///
	/// # Errors
	///
	/// Returns an error if the log cannot be fetched, decoded, or written
	/// back.
	pub async fn append(&self, record: &PredictionRecord) -> Result<()> {
		let url = format!("{API_BASE}/repos/{}/contents/{}", self.repo, self.path);

		let response = self.client.get(&url).send().await?;
		let (mut records, sha) = if response.status() == StatusCode::NOT_FOUND {
			(Vec::new(), None)
		} else {
			let file: FileContents = response.error_for_status()?.json().await?;
			(decode_log(&file.content)?, Some(file.sha))
		};

		records.push(serde_json::to_value(record)?);

		let update = UpdateFile {
			message: format!("Add prediction at {}", record.timestamp.to_rfc3339()),
			content: base64_encode(serde_json::to_vec_pretty(&records)?),
			sha,
		};

		tracing::debug!("Appending prediction to {}/{}", self.repo, self.path);
		self.client.put(&url).json(&update).send().await?.error_for_status()?;

		Ok(())
	}
}

fn decode_log(content: &str) -> Result<Vec<Value>> {
	// The contents API returns base64 broken across lines.
	let packed: String = content.split_whitespace().collect();

	Ok(serde_json::from_slice(&base64_decode(packed)?)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn records_serialize_with_the_log_schema() {
		let record = PredictionRecord {
			timestamp: Utc::now(),
			predicted_label: "happy".to_string(),
			confidence: 0.93,
			per_label_probabilities: BTreeMap::from([
				("happy".to_string(), 0.93),
				("sad".to_string(), 0.07),
			]),
		};

		let value = serde_json::to_value(&record).unwrap();
		let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
		keys.sort();

		assert_eq!(
			keys,
			["confidence", "per_label_probabilities", "predicted_label", "timestamp"]
		);
	}

	#[test]
	fn record_is_built_from_a_classification() {
		let classification = Classification {
			label: "sad".to_string(),
			confidence: 0.6,
			probabilities: BTreeMap::from([("sad".to_string(), 0.6), ("happy".to_string(), 0.4)]),
		};

		let record = PredictionRecord::from(&classification);

		assert_eq!(record.predicted_label, "sad");
		assert!((record.confidence - 0.6).abs() < f64::EPSILON);
		assert_eq!(record.per_label_probabilities, classification.probabilities);
	}

	#[test]
	fn decodes_line_wrapped_content() {
		let log = serde_json::to_vec(&json!([{"predicted_label": "happy"}])).unwrap();
		let encoded = base64_encode(&log);
		let (head, tail) = encoded.split_at(8);
		let wrapped = format!("{head}\n{tail}\n");

		let records = decode_log(&wrapped).unwrap();

		assert_eq!(records.len(), 1);
		assert_eq!(records[0]["predicted_label"], "happy");
	}
}
