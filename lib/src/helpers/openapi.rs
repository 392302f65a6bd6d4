use schemars::{
	gen::SchemaGenerator,
	schema::{Schema, SchemaObject},
	JsonSchema,
};

/// Generate an inline schema for `T`, letting `f` tweak each top-level
/// property (by name and position).
pub fn schema_with_properties<T: JsonSchema>(
	generator: &mut SchemaGenerator,
	mut f: impl FnMut(&str, &mut SchemaObject, usize),
) -> Schema {
	let mut schema = generator.root_schema_for::<T>().schema;

	for (i, (name, property)) in schema.object().properties.iter_mut().enumerate() {
		if let Schema::Object(property) = property {
			f(name, property, i);
		}
	}

	Schema::Object(schema)
}

#[cfg(test)]
mod tests {
	use super::*;
	use schemars::gen::SchemaSettings;

	#[derive(JsonSchema)]
	#[allow(dead_code)]
	struct Example {
		image: String,
		threshold: Option<f64>,
	}

	#[test]
	fn visits_every_property() {
		let mut generator = SchemaGenerator::new(SchemaSettings::openapi3().with(|settings| {
			settings.inline_subschemas = true;
		}));

		let mut seen = Vec::new();
		let schema = schema_with_properties::<Example>(&mut generator, |name, property, i| {
			seen.push((name.to_string(), i));
			property.metadata().title = Some(name.to_uppercase());
		});

		assert_eq!(seen, [("image".to_string(), 0), ("threshold".to_string(), 1)]);

		let Schema::Object(schema) = schema else {
			panic!("expected an object schema");
		};
		let object = schema.object.unwrap();
		let Schema::Object(image) = &object.properties["image"] else {
			panic!("expected an object schema for `image`");
		};
		assert_eq!(image.metadata.as_ref().unwrap().title.as_deref(), Some("IMAGE"));
	}
}
