#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

mod errors;
mod helpers;
mod prediction;
mod routes;
mod runner;
mod server;
mod shutdown;
mod spec;

pub mod labels;
pub mod preprocess;
pub mod store;

pub use machina_core::http;
pub use server::start;
pub use spec::{Classification, Classifier, ClassifierResponse, ImageFile};

#[macro_export]
macro_rules! start {
	($struct_name:ident) => {
		#[tokio::main]
		async fn main() {
			$crate::start::<$struct_name>().await.unwrap();
		}
	};
}
