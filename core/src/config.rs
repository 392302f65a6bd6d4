//! Tooling for the architecture description: the JSON tree of layer
//! definitions embedded in a model artifact. Layer definitions are objects
//! with a `class_name` and a `config` mapping, and nest arbitrarily
//! (composite layers carry child layer definitions inside their config).

use serde_json::{Map, Value};

/// Layer parameters that newer runtimes reject, by layer class. Older
/// exports wrote `groups` on depthwise convolutions; current runtimes
/// refuse to construct the layer when it is present.
pub const LEGACY_PARAMS: &[(&str, &str)] = &[("DepthwiseConv2D", "groups")];

#[must_use]
pub fn class_name(node: &Value) -> Option<&str> {
	node.get("class_name").and_then(Value::as_str)
}

#[must_use]
pub fn config(node: &Value) -> Option<&Map<String, Value>> {
	node.get("config").and_then(Value::as_object)
}

/// The human-assigned name of a layer definition, if it has one.
#[must_use]
pub fn layer_name(node: &Value) -> Option<&str> {
	config(node)?.get("name")?.as_str()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
	pub class_name: String,
	pub name: Option<String>,
	pub params: usize,
}

/// Every layer definition in the tree, depth-first.
#[must_use]
pub fn summarize(root: &Value) -> Vec<LayerSummary> {
	let mut layers = Vec::new();
	visit(root, &mut |node| {
		if let Some(class_name) = class_name(node) {
			layers.push(LayerSummary {
				class_name: class_name.to_string(),
				name: layer_name(node).map(ToString::to_string),
				params: config(node).map_or(0, Map::len),
			});
		}
	});

	layers
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyParam {
	pub class_name: String,
	pub layer: Option<String>,
	pub param: String,
}

/// Every layer definition carrying a parameter newer runtimes reject.
#[must_use]
pub fn find_legacy_params(root: &Value) -> Vec<LegacyParam> {
	let mut found = Vec::new();
	visit(root, &mut |node| {
		for (class, param) in LEGACY_PARAMS {
			if class_name(node) == Some(*class) && config(node).is_some_and(|c| c.contains_key(*param)) {
				found.push(LegacyParam {
					class_name: (*class).to_string(),
					layer: layer_name(node).map(ToString::to_string),
					param: (*param).to_string(),
				});
			}
		}
	});

	found
}

/// The error an inference runtime surfaces when handed an unpatched
/// artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
	"layer `{}` ({class_name}) uses the legacy `{param}` parameter, which current runtimes reject; run `machina fix` to repair the artifact",
	.layer.as_deref().unwrap_or("unnamed")
)]
pub struct IncompatibleConfig {
	pub class_name: String,
	pub layer: Option<String>,
	pub param: String,
}

/// Check that no layer definition would make a current runtime refuse to
/// load the model.
///
/// # Errors
///
/// Returns the first offending layer when one is found.
pub fn ensure_loadable(root: &Value) -> Result<(), IncompatibleConfig> {
	match find_legacy_params(root).into_iter().next() {
		None => Ok(()),
		Some(LegacyParam {
			class_name,
			layer,
			param,
		}) => Err(IncompatibleConfig {
			class_name,
			layer,
			param,
		}),
	}
}

fn visit<'a>(node: &'a Value, f: &mut impl FnMut(&'a Value)) {
	f(node);

	match node {
		Value::Object(map) => {
			for value in map.values() {
				visit(value, f);
			}
		},
		Value::Array(items) => {
			for item in items {
				visit(item, f);
			}
		},
		_ => {},
	}
}
