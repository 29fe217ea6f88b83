// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Tally.
//!
//! This crate provides:
//! - A reqwest client builder with a consistent User-Agent header
//! - Retry with exponential backoff for transient failures
//! - The [`RetryableError`] classification shared by every Tally crate

mod client;
mod retry;

pub use client::{builder, builder_with_user_agent, platform, user_agent, SDK_NAME, SDK_VERSION};
pub use retry::{is_retryable_status, retry, RetryConfig, RetryableError, RETRYABLE_STATUSES};
