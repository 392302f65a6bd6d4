//! Turns an image into the model's input tensor. The export pipeline fixes
//! the contract: 224×224 RGB, normalized to `[-1, 1]`, one image per
//! batch, row-major `[height][width][channel]`.

use image::{imageops::FilterType, DynamicImage};

/// Input width and height, in pixels.
pub const INPUT_SIZE: u32 = 224;

/// Input channels (RGB).
pub const CHANNELS: usize = 3;

/// Number of values in one input tensor.
pub const TENSOR_LEN: usize = (INPUT_SIZE as usize) * (INPUT_SIZE as usize) * CHANNELS;

/// Resize and normalize an image into an input tensor.
#[must_use]
pub fn tensor_from_image(image: &DynamicImage) -> Vec<f32> {
	let resized = image
		.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
		.to_rgb8();

	resized
		.pixels()
		.flat_map(|pixel| pixel.0.into_iter().map(normalize))
		.collect()
}

/// Map one channel value into `[-1, 1]`.
#[must_use]
pub fn normalize(channel: u8) -> f32 {
	f32::from(channel) / 127.5 - 1.0
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{Rgb, RgbImage};

	fn uniform(value: u8) -> DynamicImage {
		DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([value, value, value])))
	}

	#[test]
	fn tensor_has_the_model_shape() {
		let tensor = tensor_from_image(&uniform(128));

		assert_eq!(tensor.len(), TENSOR_LEN);
	}

	#[test]
	fn values_are_normalized_into_minus_one_one() {
		assert!(tensor_from_image(&uniform(0)).iter().all(|&v| (v - -1.0).abs() < 1e-6));
		assert!(tensor_from_image(&uniform(255)).iter().all(|&v| (v - 1.0).abs() < 1e-6));

		let mid = tensor_from_image(&uniform(128));
		assert!(mid.iter().all(|&v| v.abs() < 0.01));
	}

	#[test]
	fn channels_stay_interleaved() {
		let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(
			INPUT_SIZE,
			INPUT_SIZE,
			Rgb([255, 0, 255]),
		));

		let tensor = tensor_from_image(&image);
		let pixel = &tensor[..CHANNELS];

		assert!((pixel[0] - 1.0).abs() < 1e-6);
		assert!((pixel[1] - -1.0).abs() < 1e-6);
		assert!((pixel[2] - 1.0).abs() < 1e-6);
	}
}
