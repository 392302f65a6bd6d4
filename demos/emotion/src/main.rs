use anyhow::Result;
use machina::{labels, preprocess, Classification, Classifier, ImageFile};
use schemars::JsonSchema;
use std::future::Future;
use tch::{
	nn::{ModuleT, VarStore},
	vision::resnet::resnet18,
	Device, Kind, Tensor,
};

#[derive(serde::Deserialize, JsonSchema)]
struct ClassifyRequest {
	/// Image to classify
	image: ImageFile,
}

struct EmotionClassifier {
	model: Box<dyn ModuleT + Send>,
	labels: Vec<String>,
}

impl Classifier for EmotionClassifier {
	type Request = ClassifyRequest;
	type Response = Classification;

	fn setup() -> impl Future<Output = Result<Self>> + Send {
		async {
			let labels = labels::load_labels("labels.txt")?;

			let mut vs = VarStore::new(Device::cuda_if_available());
			let model = Box::new(resnet18(&vs.root(), labels.len() as i64));
			vs.load("weights/emotion.safetensors")?;

			Ok(Self { model, labels })
		}
	}

	fn predict(&self, input: Self::Request) -> Result<Self::Response> {
		let image = input.image.decode()?;

		// The model wants NCHW; the preprocessed tensor is HWC.
		let tensor = Tensor::from_slice(&preprocess::tensor_from_image(&image))
			.view([
				1,
				i64::from(preprocess::INPUT_SIZE),
				i64::from(preprocess::INPUT_SIZE),
				preprocess::CHANNELS as i64,
			])
			.permute([0, 3, 1, 2]);

		let scores = self
			.model
			.forward_t(&tensor, false)
			.softmax(-1, Kind::Double)
			.squeeze();

		Classification::from_scores(&self.labels, &Vec::<f64>::try_from(&scores)?)
	}
}

machina::start!(EmotionClassifier);
