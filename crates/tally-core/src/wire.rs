// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire encoding for the ingestion API.
//!
//! Payloads are the JSON form of flattened entities (an object for a single
//! item, an array for a batch), base64-encoded with the standard alphabet and
//! sent as the `data` parameter.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::entity::Trackable;
use crate::error::WireError;

/// Maximum number of items the ingestion API accepts in one batch request.
pub const MAX_BATCH_SIZE: usize = 50;

/// JSON-serializes `value` and base64-encodes the result.
pub fn encode(value: &Value) -> Result<String, WireError> {
	let json = serde_json::to_vec(value)?;
	Ok(STANDARD.encode(json))
}

/// Encodes one entity as a JSON object payload.
pub fn encode_single<T: Trackable + ?Sized>(item: &T) -> Result<String, WireError> {
	encode(&Value::Object(item.flatten()))
}

/// Encodes a list of entities as a JSON array payload, preserving order.
pub fn encode_batch<T: Trackable>(items: &[T]) -> Result<String, WireError> {
	let array = items
		.iter()
		.map(|item| Value::Object(item.flatten()))
		.collect();
	encode(&Value::Array(array))
}

/// Reverses [`encode`].
pub fn decode(data: &str) -> Result<Value, WireError> {
	let bytes = STANDARD.decode(data)?;
	Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::Event;
	use crate::profile::ProfileUpdate;
	use serde_json::json;

	#[test]
	fn test_encode_known_value() {
		assert_eq!(encode(&json!({"a": 1})).unwrap(), "eyJhIjoxfQ==");
	}

	#[test]
	fn test_single_payload_is_object() {
		let event = Event::new("opened").with_token("tok");
		let decoded = decode(&encode_single(&event).unwrap()).unwrap();

		assert_eq!(decoded["event"], "opened");
		assert_eq!(decoded["properties"]["token"], "tok");
	}

	#[test]
	fn test_batch_payload_preserves_order() {
		let updates: Vec<ProfileUpdate> = (0..3)
			.map(|i| ProfileUpdate::set(format!("user-{i}"), json!({"n": i})))
			.collect();

		let decoded = decode(&encode_batch(&updates).unwrap()).unwrap();
		let ids: Vec<&str> = decoded
			.as_array()
			.unwrap()
			.iter()
			.map(|v| v["$distinct_id"].as_str().unwrap())
			.collect();
		assert_eq!(ids, ["user-0", "user-1", "user-2"]);
	}

	#[test]
	fn test_decode_rejects_garbage() {
		assert!(matches!(decode("%%%"), Err(WireError::Base64(_))));
		assert!(matches!(decode("bm90IGpzb24="), Err(WireError::Json(_))));
	}
}
