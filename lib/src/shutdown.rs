use axum::Extension;
use std::{
	future::Future,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};
use tokio::{signal, sync::watch};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("shutdown handler already created")]
pub struct AlreadyCreatedError;

static CREATED: AtomicBool = AtomicBool::new(false);

/// Fans a single shutdown signal (Ctrl+C, SIGTERM, or an explicit
/// request) out to every subscriber.
#[derive(Debug, Clone)]
pub struct Shutdown {
	sender: Arc<watch::Sender<bool>>,
	receiver: watch::Receiver<bool>,
}

#[derive(Debug, Clone)]
pub struct Agent {
	sender: Arc<watch::Sender<bool>>,
}

impl Agent {
	pub fn start(&self) {
		tracing::info!("Shutdown requested");
		self.sender.send_replace(true);
	}
}

impl Shutdown {
	/// Create the process-wide shutdown handle.
	///
	/// # Errors
	///
	/// Returns an error if a handle was already created.
	pub fn new() -> Result<Self, AlreadyCreatedError> {
		if CREATED.swap(true, Ordering::SeqCst) {
			return Err(AlreadyCreatedError);
		}

		let (sender, receiver) = watch::channel(false);
		let sender = Arc::new(sender);

		let signal_sender = sender.clone();
		tokio::spawn(async move {
			register_handlers().await;
			signal_sender.send_replace(true);
		});

		Ok(Self { sender, receiver })
	}

	pub fn start(&self) {
		tracing::info!("Shutdown requested");
		self.sender.send_replace(true);
	}

	pub fn handle(&self) -> impl Future<Output = ()> {
		let mut receiver = self.receiver.clone();

		async move {
			if *receiver.borrow() {
				return;
			}

			receiver.changed().await.ok();
		}
	}

	pub fn extension(&self) -> Extension<Agent> {
		Extension(Agent {
			sender: self.sender.clone(),
		})
	}
}

fn register_handlers() -> impl Future<Output = ()> {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	async move {
		tokio::select! {
			() = ctrl_c => {},
			_ = terminate => {},
		}
	}
}
