use std::{env, net::SocketAddr};

use aide::openapi::{self, OpenApi};
use anyhow::Result;
use axum::{Extension, Server};
use indexmap::indexmap;
use schemars::gen::{SchemaGenerator, SchemaSettings};
use tracing_subscriber::EnvFilter;

use machina_core::http;

use crate::{
	helpers::openapi::schema_with_properties,
	prediction::Prediction,
	routes,
	shutdown::Shutdown,
	Classifier,
};

/// Serve a classifier until a shutdown signal arrives.
///
/// # Errors
///
/// This function will return an error if the PORT environment variable is
/// set but cannot be parsed, or if the server fails to start.
pub async fn start<T: Classifier + 'static>() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.try_init()
		.ok();

	let shutdown = Shutdown::new()?;
	let prediction = Prediction::setup::<T>(shutdown.clone());

	let mut openapi = generate_schema::<T>();
	let router = routes::handler().finish_api(&mut openapi);

	if should_dump_schema() {
		println!("{}", serde_json::to_string(&openapi).unwrap());
		shutdown.start();
		return Ok(());
	}

	let router = router
		.layer(prediction.extension())
		.layer(shutdown.extension())
		.layer(Extension(openapi));

	let addr = SocketAddr::from((
		[0, 0, 0, 0],
		env::var("PORT").map_or(Ok(5000), |p| p.parse())?,
	));

	tracing::info!("Starting server on {addr}...");
	Server::bind(&addr)
		.serve(router.into_make_service())
		.with_graceful_shutdown(shutdown.handle())
		.await?;

	Ok(())
}

fn generate_schema<T: Classifier>() -> OpenApi {
	let mut generator = SchemaGenerator::new(SchemaSettings::openapi3().with(|settings| {
		settings.inline_subschemas = true;
	}));

	OpenApi {
		info: openapi::Info {
			title: "machina".to_string(),
			version: env!("CARGO_PKG_VERSION").to_string(),
			..openapi::Info::default()
		},
		components: Some(openapi::Components {
			schemas: indexmap! {
				"Input".to_string() => openapi::SchemaObject {
					example: None,
					external_docs: None,
					json_schema: schema_with_properties::<T::Request>(&mut generator, |name, schema, i| {
						schema.metadata().title = Some(titlecase::titlecase(name));
						schema.extensions.insert("x-order".to_string(), (i + 1).into());
					})
				},
				"PredictionRequest".to_string() => openapi::SchemaObject {
					example: None,
					external_docs: None,
					json_schema: schema_with_properties::<http::Request>(&mut generator, |name, schema, _| {
						if name == "input" {
							schema.reference = Some("#/components/schemas/Input".to_string());
						}
					})
				},
				"Output".to_string() => openapi::SchemaObject {
					example: None,
					external_docs: None,
					json_schema: generator.subschema_for::<T::Response>()
				},
				"PredictionResponse".to_string() => openapi::SchemaObject {
					example: None,
					external_docs: None,
					json_schema: schema_with_properties::<http::Response>(&mut generator, |name, schema, _| {
						if name == "input" {
							schema.reference = Some("#/components/schemas/Input".to_string());
						}

						if name == "output" {
							schema.reference = Some("#/components/schemas/Output".to_string());
						}
					})
				},
			},
			..openapi::Components::default()
		}),
		..OpenApi::default()
	}
}

fn should_dump_schema() -> bool {
	let argv: Vec<String> = env::args().collect();
	argv.len() > 1 && argv[1] == "--dump-schema-and-exit"
}
