use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use reqwest::StatusCode;
use serde_json::json;
use std::path::Path;

use machina_core::http::{HTTPValidationError, Response};

pub async fn handle(image: &Path, host: &str, store: bool) -> Result<()> {
	let bytes =
		std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
	let mime_type = tree_magic_mini::from_u8(&bytes);
	let dataurl = format!("data:{mime_type};base64,{}", Base64.encode(&bytes));

	println!("Sending {} to {host}...", image.display());

	let response = reqwest::Client::new()
		.post(format!("{}/predictions", host.trim_end_matches('/')))
		.json(&json!({ "input": { "image": dataurl }, "store": store }))
		.send()
		.await?;

	if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
		let detail = response.text().await?;
		match serde_json::from_str::<HTTPValidationError>(&detail) {
			Ok(errors) => bail!("the server rejected the request: {errors:?}"),
			Err(_) => bail!("the server rejected the request: {detail}"),
		}
	}

	let prediction: Response = response.error_for_status()?.json().await?;

	match (prediction.output, prediction.error) {
		(Some(output), _) => println!("{}", serde_json::to_string_pretty(&output)?),
		(None, Some(error)) => bail!("prediction failed: {error}"),
		(None, None) => bail!("the server returned no output"),
	}

	Ok(())
}
