use chrono::{DateTime, Utc};
use map_macro::hash_map;
use serde_json::Value;
use std::{
	future::Future,
	sync::{atomic::Ordering, Arc},
	time::Duration,
};
use tokio::sync::RwLock;

use machina_core::http::{Request, Response, Status};

use crate::{
	errors::ValidationErrorSet,
	runner::{Error as RunnerError, Health, Runner, RUNNER_HEALTH},
	shutdown::Shutdown,
	spec::Classification,
	store::{PredictionRecord, PredictionStore},
	Classifier,
};

pub type Extension = axum::Extension<Arc<RwLock<Prediction>>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("Attempted to re-initialize a prediction")]
	AlreadyRunning,

	#[error("Prediction is not yet complete")]
	NotComplete,

	#[error("The requested prediction does not exist")]
	Unknown,

	#[error("Failed to wait for prediction: {0}")]
	ReceiverError(#[from] flume::RecvError),

	#[error("Failed to run prediction: {0}")]
	Validation(#[from] ValidationErrorSet),
}

pub struct Prediction {
	runner: Runner,
	pub status: Status,
	pub id: Option<String>,
	pub shutdown: Shutdown,
	cancel: flume::Sender<()>,
	store: Option<Arc<PredictionStore>>,
	pub request: Option<Request>,
	pub response: Option<Response>,
	complete: Option<flume::Receiver<Response>>,
}

impl Prediction {
	pub fn setup<T: Classifier + 'static>(shutdown: Shutdown) -> Self {
		let (cancel_tx, cancel_rx) = flume::unbounded();

		let store = match PredictionStore::from_env() {
			Ok(store) => store.map(Arc::new),
			Err(e) => {
				tracing::warn!("Prediction store disabled: {e}");
				None
			},
		};

		Self {
			id: None,
			store,
			request: None,
			complete: None,
			response: None,
			cancel: cancel_tx,
			status: Status::Idle,
			shutdown: shutdown.clone(),
			runner: Runner::new::<T>(shutdown, cancel_rx),
		}
	}

	pub fn init(&mut self, id: Option<String>, req: Request) -> Result<&mut Self, Error> {
		if !matches!(self.status, Status::Idle) {
			tracing::debug!("Attempted to re-initialize a prediction");
			return Err(Error::AlreadyRunning);
		}

		self.validate(&req.input)
			.map_err(|e| e.fill_loc(&["body", "input"]))?;

		tracing::debug!("Initializing prediction: {id:?}");

		self.id = id;
		self.request = Some(req);
		self.status = Status::Starting;

		Ok(self)
	}

	pub fn validate(&self, input: &Value) -> Result<(), ValidationErrorSet> {
		self.runner.validate(input)
	}

	pub async fn run(&mut self) -> Result<Response, Error> {
		self.process()?.await;

		self.result()
	}

	pub async fn wait_for(&self, id: String) -> Result<Response, Error> {
		if self.id != Some(id.clone()) {
			tracing::debug!("Attempted to wait for prediction with unknown ID: {id:?}");
			return Err(Error::Unknown);
		}

		if let Some(response) = self.response.clone() {
			tracing::debug!("Prediction already complete: {id:?}");
			return Ok(response);
		}

		if !matches!(self.status, Status::Processing) {
			tracing::debug!("Attempted to wait for prediction that isn't running: {id:?}");
			return Err(Error::AlreadyRunning);
		}

		tracing::debug!("Waiting for prediction: {id:?}");
		let complete = self.complete.as_ref().unwrap();
		Ok(complete.recv_async().await?)
	}

	pub fn process(&mut self) -> Result<impl Future<Output = ()> + '_, Error> {
		if !matches!(self.status, Status::Starting) {
			tracing::debug!(
				"Attempted to process prediction while not ready: {:?}",
				self.id
			);
			return Err(Error::AlreadyRunning);
		}

		let req = self.request.clone().unwrap();
		self.status = Status::Processing;

		let (complete_tx, complete_rx) = flume::bounded(1);
		self.complete = Some(complete_rx);

		Ok(async move {
			let started_at = Utc::now();
			tracing::debug!("Running prediction: {:?}", self.id);

			self.status = Status::Processing;
			self.response = Some(Response::starting(self.id.clone(), req.clone()));

			tokio::select! {
				() = self.shutdown.handle() => {
					tracing::debug!("Shutdown requested. Cancelling running prediction: {:?}", self.id);
					return;
				},
				output = self.runner.run(req.clone()) => {
					tracing::debug!("Prediction complete: {:?}", self.id);

					match output {
						Ok((output, predict_time)) => {
							self.status = Status::Succeeded;
							if req.store.unwrap_or(false) {
								self.persist(&output).await;
							}
							self.response = Some(Response::success(self.id.clone(), req, output, predict_time, started_at));
						},
						Err(RunnerError::Canceled) => {
							self.status = Status::Canceled;
							self.response = Some(Response::canceled(self.id.clone(), req, started_at));
						},
						Err(error) => {
							self.status = Status::Failed;
							self.response = Some(Response::error(self.id.clone(), req, &error, started_at));
						}
					}
				}
			}
			complete_tx.send(self.response.clone().unwrap()).unwrap();
		})
	}

	/// Append a successful output to the prediction store, if one is
	/// configured and the output is a classification. Failures are
	/// logged, never surfaced to the caller.
	async fn persist(&self, output: &Value) {
		let Some(store) = &self.store else {
			tracing::warn!("Prediction storage was requested, but no store is configured");
			return;
		};

		match serde_json::from_value::<Classification>(output.clone()) {
			Err(_) => tracing::debug!("Output is not a classification; not persisting it"),
			Ok(classification) => {
				if let Err(e) = store.append(&PredictionRecord::from(&classification)).await {
					tracing::error!("Failed to persist prediction: {e:?}");
				}
			},
		}
	}

	pub fn result(&mut self) -> Result<Response, Error> {
		if !matches!(
			self.status,
			Status::Succeeded | Status::Failed | Status::Canceled
		) {
			tracing::debug!(
				"Attempted to get result of prediction that is not complete: {:?}",
				self.id
			);
			return Err(Error::NotComplete);
		}

		tracing::debug!("Getting result of prediction: {:?}", self.id);
		let response = self.response.clone().ok_or(Error::NotComplete)?;
		self.reset();

		Ok(response)
	}

	pub fn cancel(&mut self, id: &str) -> Result<&mut Self, Error> {
		if self.id != Some(id.to_string()) {
			tracing::debug!("Attempted to cancel prediction with unknown ID: {id}");
			return Err(Error::Unknown);
		}

		if !matches!(self.status, Status::Processing) {
			tracing::debug!("Attempted to cancel prediction that is not running: {id}");
			return Err(Error::AlreadyRunning);
		}

		tracing::debug!("Canceling prediction: {id}");
		self.cancel.send(()).unwrap();
		self.status = Status::Canceled;

		Ok(self)
	}

	pub fn reset(&mut self) {
		tracing::debug!("Resetting prediction");

		self.id = None;
		self.request = None;
		self.response = None;
		self.complete = None;
		self.status = Status::Idle;
	}

	pub fn extension(self) -> Extension {
		axum::Extension(Arc::new(RwLock::new(self)))
	}
}

pub struct SyncGuard<'a> {
	prediction: tokio::sync::RwLockWriteGuard<'a, Prediction>,
}

impl<'a> SyncGuard<'a> {
	pub fn new(prediction: tokio::sync::RwLockWriteGuard<'a, Prediction>) -> Self {
		Self { prediction }
	}

	pub fn init(&mut self, id: Option<String>, req: Request) -> Result<&mut Self, Error> {
		self.prediction.init(id, req)?;
		Ok(self)
	}

	pub async fn run(&mut self) -> Result<Response, Error> {
		self.prediction.run().await
	}
}

impl Drop for SyncGuard<'_> {
	fn drop(&mut self) {
		tracing::debug!("SyncGuard dropped, resetting prediction");

		self.prediction.reset();
		if matches!(RUNNER_HEALTH.load(Ordering::SeqCst), Health::Busy) {
			self.prediction.cancel.send(()).unwrap();
		}
	}
}

/// Constructors for the response shapes the prediction lifecycle emits.
pub trait ResponseHelpers {
	fn starting(id: Option<String>, req: Request) -> Response;
	fn success(
		id: Option<String>,
		req: Request,
		output: Value,
		predict_time: Duration,
		started_at: DateTime<Utc>,
	) -> Response;
	fn error(id: Option<String>, req: Request, error: &RunnerError, started_at: DateTime<Utc>) -> Response;
	fn canceled(id: Option<String>, req: Request, started_at: DateTime<Utc>) -> Response;
}

impl ResponseHelpers for Response {
	fn starting(id: Option<String>, req: Request) -> Self {
		Self {
			id,
			input: Some(req.input),
			status: Status::Processing,
			started_at: Some(Utc::now()),
			..Self::default()
		}
	}

	fn success(
		id: Option<String>,
		req: Request,
		output: Value,
		predict_time: Duration,
		started_at: DateTime<Utc>,
	) -> Self {
		Self {
			id,
			output: Some(output),
			input: Some(req.input),
			status: Status::Succeeded,
			started_at: Some(started_at),
			completed_at: Some(Utc::now()),
			metrics: Some(hash_map! {
				"predict_time".to_string() => predict_time.as_secs_f64().into()
			}),
			..Self::default()
		}
	}

	fn error(id: Option<String>, req: Request, error: &RunnerError, started_at: DateTime<Utc>) -> Self {
		Self {
			id,
			input: Some(req.input),
			status: Status::Failed,
			started_at: Some(started_at),
			error: Some(error.to_string()),
			..Self::default()
		}
	}

	fn canceled(id: Option<String>, req: Request, started_at: DateTime<Utc>) -> Self {
		Self {
			id,
			input: Some(req.input),
			status: Status::Canceled,
			started_at: Some(started_at),
			..Self::default()
		}
	}
}
