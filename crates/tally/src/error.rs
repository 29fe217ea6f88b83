// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Tally SDK.

use std::time::Duration;

use reqwest::StatusCode;
use tally_common_http::{is_retryable_status, RetryableError};
use tally_core::{ValidationError, WireError};
use thiserror::Error;

/// Errors surfaced to callers of [`crate::TallyClient`].
#[derive(Debug, Error)]
pub enum TallyError {
	/// Project token is missing or empty.
	#[error("project token is required")]
	MissingToken,

	/// Base URL is missing or invalid.
	#[error("invalid base URL: {0}")]
	InvalidBaseUrl(String),

	/// A required argument was missing or malformed.
	#[error("invalid argument: {0}")]
	InvalidArgument(#[from] ValidationError),

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,

	/// Delivery failed in a way that retrying cannot fix.
	#[error("delivery failed: {0}")]
	Delivery(#[from] DeliveryError),

	/// The HTTP client could not be constructed.
	#[error("failed to build HTTP client: {0}")]
	HttpClient(#[source] reqwest::Error),

	/// The local store could not be located or updated.
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Outcome of a failed send, classified by [`RetryableError::is_retryable`].
///
/// Retryable errors are transient: the single-item path buffers the entity and
/// the drain path keeps the chunk for the next cycle. Everything else is fatal.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The request or the response body failed on the wire.
	#[error("HTTP request failed: {0}")]
	Request(#[from] reqwest::Error),

	/// The send did not complete within the configured timeout.
	#[error("request timed out after {0:?}")]
	Timeout(Duration),

	/// Server returned a non-success status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// The ingestion API accepted the request but refused the payload.
	#[error("payload rejected: {0}")]
	Rejected(String),

	/// The response did not follow the ingestion API's protocol.
	#[error("unexpected response: {0}")]
	UnexpectedResponse(String),

	/// The payload could not be encoded.
	#[error("failed to encode payload: {0}")]
	Encoding(#[from] WireError),
}

impl RetryableError for DeliveryError {
	fn is_retryable(&self) -> bool {
		match self {
			DeliveryError::Request(e) => e.is_retryable(),
			DeliveryError::Timeout(_) => true,
			DeliveryError::ServerError { status, .. } => StatusCode::from_u16(*status)
				.map(is_retryable_status)
				.unwrap_or(false),
			DeliveryError::Rejected(_)
			| DeliveryError::UnexpectedResponse(_)
			| DeliveryError::Encoding(_) => false,
		}
	}
}

/// Local store failures. Loads and plain saves log them and degrade to an
/// empty or unsaved state; transactions report them.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("failed to acquire store lock: {0}")]
	Lock(String),

	#[error("could not determine a state directory for the local store")]
	NoStateDir,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, TallyError>;
