use anyhow::Result;
use atomic_enum::atomic_enum;
use jsonschema::JSONSchema;
use schemars::{schema_for, JsonSchema};
use serde_json::Value;
use std::{
	sync::{atomic::Ordering, Arc},
	time::Duration,
};
use tokio::sync::{mpsc, oneshot};

use machina_core::http::Request;

use crate::{
	errors::ValidationErrorSet, helpers::with_timing, shutdown::Shutdown, spec::Classifier,
	ClassifierResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Runner is busy")]
	Busy,

	#[error("Prediction was canceled")]
	Canceled,

	#[error("Failed to validate input.")]
	Validation(ValidationErrorSet),

	#[error("Failed to run prediction: {0}")]
	Prediction(#[from] anyhow::Error),
}

#[atomic_enum]
#[derive(serde::Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
	Unknown,
	Starting,
	Ready,
	Busy,
	SetupFailed,
}

pub static RUNNER_HEALTH: AtomicHealth = AtomicHealth::new(Health::Unknown);

type ResponseSender = oneshot::Sender<Result<(Value, Duration), Error>>;

#[derive(Clone)]
pub struct Runner {
	schema: Arc<JSONSchema>,
	sender: mpsc::Sender<(ResponseSender, Request)>,
}

impl Runner {
	pub fn new<T: Classifier + 'static>(shutdown: Shutdown, cancel: flume::Receiver<()>) -> Self {
		RUNNER_HEALTH.swap(Health::Starting, Ordering::SeqCst);

		let (sender, mut rx) = mpsc::channel::<(ResponseSender, Request)>(1);

		let handle_shutdown = shutdown.clone();
		let handle = tokio::spawn(async move {
			let Ok(classifier) = T::setup().await else {
				RUNNER_HEALTH.swap(Health::SetupFailed, Ordering::SeqCst);
				handle_shutdown.start();
				return;
			};

			RUNNER_HEALTH.swap(Health::Ready, Ordering::SeqCst);

			while let Some((tx, req)) = rx.recv().await {
				RUNNER_HEALTH.swap(Health::Busy, Ordering::SeqCst);

				// Drop cancellations left over from a previous run.
				while cancel.try_recv().is_ok() {}

				let (result, predict_time) =
					with_timing(|| classifier.predict(serde_json::from_value(req.input.clone()).unwrap()));

				let response = if cancel.try_recv().is_ok() {
					Err(Error::Canceled)
				} else {
					match result {
						Ok(output) => output
							.into_response(req)
							.await
							.map(|value| (value, predict_time))
							.map_err(Error::Prediction),
						Err(error) => Err(Error::Prediction(error)),
					}
				};

				tx.send(response).ok();

				RUNNER_HEALTH.swap(Health::Ready, Ordering::SeqCst);
			}
		});

		tokio::spawn(async move {
			shutdown.handle().await;
			handle.abort();
		});

		let schema = jsonschema::JSONSchema::compile(
			&serde_json::to_value(schema_for!(T::Request)).unwrap(),
		)
		.unwrap();

		Self {
			sender,
			schema: Arc::new(schema),
		}
	}

	pub fn validate(&self, input: &Value) -> Result<(), ValidationErrorSet> {
		self.schema.validate(input)?;

		Ok(())
	}

	pub async fn run(&self, req: Request) -> Result<(Value, Duration), Error> {
		if !matches!(RUNNER_HEALTH.load(Ordering::SeqCst), Health::Ready) {
			return Err(Error::Busy);
		}

		self.validate(&req.input).map_err(Error::Validation)?;
		RUNNER_HEALTH.swap(Health::Busy, Ordering::SeqCst);

		let (tx, rx) = oneshot::channel();

		self.sender.send((tx, req)).await.unwrap_or_default();

		let result = rx.await.unwrap();

		RUNNER_HEALTH.swap(Health::Ready, Ordering::SeqCst);

		result
	}
}
