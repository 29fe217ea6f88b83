// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use crate::profile::UpdateOperation;

#[derive(Debug, Error)]
pub enum EntityIdError {
	#[error("invalid entity ID prefix: expected 'ev-' or 'pu-', got '{0}'")]
	InvalidPrefix(String),

	#[error("invalid UUID in entity ID: {0}")]
	InvalidUuid(#[from] uuid::Error),
}

/// Precondition violations detected before an entity is sent or stored.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("event name must not be empty")]
	EmptyEventName,

	#[error("distinct ID must not be empty")]
	EmptyDistinctId,

	#[error("alias must not be empty")]
	EmptyAlias,

	#[error("{operation} expects {expected}")]
	InvalidOperationValue {
		operation: UpdateOperation,
		expected: &'static str,
	},
}

#[derive(Debug, Error)]
pub enum WireError {
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("base64 error: {0}")]
	Base64(#[from] base64::DecodeError),
}
