use base64::{engine::general_purpose::STANDARD as Base64, DecodeError, Engine};
use std::time::{Duration, Instant};

pub mod headers;
pub mod openapi;

pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
	Base64.encode(bytes)
}

pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>, DecodeError> {
	Base64.decode(bytes)
}

/// Run `f`, returning its output along with how long it took.
pub fn with_timing<T>(f: impl FnOnce() -> T) -> (T, Duration) {
	let start = Instant::now();
	let output = f();

	(output, start.elapsed())
}
