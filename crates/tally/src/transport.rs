// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network transport for encoded payloads.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tally_core::Endpoint;
use tracing::{debug, instrument};

use crate::error::DeliveryError;

/// Sends base64-encoded payloads to the ingestion API.
///
/// `Ok(())` means the server accepted the payload. Errors are classified
/// through [`tally_common_http::RetryableError`].
#[async_trait]
pub trait Transport: Send + Sync {
	/// Sends one encoded entity.
	async fn send(&self, endpoint: Endpoint, data: &str) -> Result<(), DeliveryError>;

	/// Sends an encoded array of at most [`tally_core::MAX_BATCH_SIZE`] entities.
	async fn send_batch(&self, endpoint: Endpoint, data: &str) -> Result<(), DeliveryError>;
}

/// Query flags attached to every request.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
	/// Ask for a JSON response carrying an error message.
	pub verbose: bool,
	/// Let the server derive location from the request IP.
	pub geolocate: bool,
}

impl Default for TransportOptions {
	fn default() -> Self {
		Self {
			verbose: false,
			geolocate: true,
		}
	}
}

/// [`Transport`] over HTTP.
///
/// Single items go out as `GET {base}/{endpoint}/?data=...`; batches as a
/// form-encoded `POST` with the payload in the `data` field.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	base_url: String,
	http_client: reqwest::Client,
	options: TransportOptions,
}

#[derive(Debug, Deserialize)]
struct VerboseResponse {
	status: i64,
	#[serde(default)]
	error: Option<String>,
}

impl HttpTransport {
	/// `base_url` must not end with a slash.
	pub fn new(base_url: impl Into<String>, http_client: reqwest::Client, options: TransportOptions) -> Self {
		Self {
			base_url: base_url.into(),
			http_client,
			options,
		}
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	fn url(&self, endpoint: Endpoint) -> String {
		format!("{}/{}/", self.base_url, endpoint.as_str())
	}

	fn common_query(&self) -> Vec<(&'static str, String)> {
		let mut query = vec![("ip", if self.options.geolocate { "1" } else { "0" }.to_string())];
		if self.options.verbose {
			query.push(("verbose", "1".to_string()));
		}
		query
	}

	async fn interpret(&self, response: reqwest::Response) -> Result<(), DeliveryError> {
		let status = response.status();
		let body = match response.text().await {
			Ok(body) => body,
			Err(e) if status.is_success() => return Err(DeliveryError::Request(e)),
			Err(e) => {
				debug!(error = %e, "Failed to read error response body");
				String::new()
			}
		};

		if !status.is_success() {
			return Err(DeliveryError::ServerError {
				status: status.as_u16(),
				message: body,
			});
		}

		interpret_body(&body)
	}
}

/// Success bodies are `1`, or `{"status":1}` in verbose mode.
fn interpret_body(body: &str) -> Result<(), DeliveryError> {
	let trimmed = body.trim();

	if trimmed.starts_with('{') {
		return match serde_json::from_str::<VerboseResponse>(trimmed) {
			Ok(VerboseResponse { status: 1, .. }) => Ok(()),
			Ok(VerboseResponse { error, .. }) => Err(DeliveryError::Rejected(
				error.unwrap_or_else(|| "no error message".to_string()),
			)),
			Err(_) => Err(DeliveryError::UnexpectedResponse(trimmed.to_string())),
		};
	}

	match trimmed {
		"1" => Ok(()),
		"0" => Err(DeliveryError::Rejected("server returned 0".to_string())),
		other => Err(DeliveryError::UnexpectedResponse(other.to_string())),
	}
}

#[async_trait]
impl Transport for HttpTransport {
	#[instrument(skip(self, data), fields(endpoint = %endpoint))]
	async fn send(&self, endpoint: Endpoint, data: &str) -> Result<(), DeliveryError> {
		let mut query = self.common_query();
		query.push(("data", data.to_string()));

		let response = self
			.http_client
			.get(self.url(endpoint))
			.query(&query)
			.send()
			.await?;

		debug!(status = %response.status(), "Single send response");
		self.interpret(response).await
	}

	#[instrument(skip(self, data), fields(endpoint = %endpoint))]
	async fn send_batch(&self, endpoint: Endpoint, data: &str) -> Result<(), DeliveryError> {
		let mut query = self.common_query();
		query.push(("_", Utc::now().timestamp_millis().to_string()));

		let response = self
			.http_client
			.post(self.url(endpoint))
			.query(&query)
			.form(&[("data", data)])
			.send()
			.await?;

		debug!(status = %response.status(), "Batch send response");
		self.interpret(response).await
	}
}
