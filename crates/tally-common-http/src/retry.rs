// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry logic with exponential backoff for HTTP requests.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP statuses that indicate a transient condition on the remote side.
pub const RETRYABLE_STATUSES: [StatusCode; 6] = [
	StatusCode::TOO_MANY_REQUESTS,
	StatusCode::REQUEST_TIMEOUT,
	StatusCode::INTERNAL_SERVER_ERROR,
	StatusCode::BAD_GATEWAY,
	StatusCode::SERVICE_UNAVAILABLE,
	StatusCode::GATEWAY_TIMEOUT,
];

/// Returns true if a response with this status is worth sending again later.
pub fn is_retryable_status(status: StatusCode) -> bool {
	RETRYABLE_STATUSES.contains(&status)
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Total attempts, including the first one. Values below 1 behave as 1.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl RetryConfig {
	/// A policy that makes exactly one attempt.
	pub fn no_retry() -> Self {
		Self {
			max_attempts: 1,
			..Self::default()
		}
	}
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

/// Classifies an error as transient (worth retrying) or permanent.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

/// Errors carrying an HTTP status follow [`is_retryable_status`]. Errors
/// without one failed on the wire (refused, reset, timed out, body cut off)
/// and are transient, except malformed requests and redirect loops.
impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		match self.status() {
			Some(status) => is_retryable_status(status),
			None => !(self.is_builder() || self.is_redirect()),
		}
	}
}

fn calculate_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let exponential_delay = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(attempt as i32);
	let capped_delay = exponential_delay.min(cfg.max_delay.as_secs_f64());

	let final_delay = if cfg.jitter {
		capped_delay * (0.5 + fastrand::f64())
	} else {
		capped_delay
	};

	Duration::from_secs_f64(final_delay)
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or the
/// attempt budget in `cfg` is spent. The last error is returned.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let max_attempts = cfg.max_attempts.max(1);
	let mut attempt = 0;

	loop {
		let err = match f().await {
			Ok(result) => return Ok(result),
			Err(err) => err,
		};
		attempt += 1;

		if !err.is_retryable() {
			debug!(error = ?err, attempt, "non-retryable error encountered");
			return Err(err);
		}

		if attempt >= max_attempts {
			if max_attempts > 1 {
				warn!(
					error = ?err,
					attempt,
					max_attempts,
					"max retry attempts exhausted"
				);
			}
			return Err(err);
		}

		let delay = calculate_delay(cfg, attempt - 1);
		warn!(
			error = ?err,
			attempt,
			max_attempts,
			delay_ms = delay.as_millis(),
			"retrying after error"
		);

		tokio::time::sleep(delay).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	#[derive(Debug)]
	struct FlakyError {
		transient: bool,
	}

	impl RetryableError for FlakyError {
		fn is_retryable(&self) -> bool {
			self.transient
		}
	}

	fn fast_config(max_attempts: u32) -> RetryConfig {
		RetryConfig {
			max_attempts,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
			backoff_factor: 2.0,
			jitter: false,
		}
	}

	async fn count_attempts(cfg: &RetryConfig, transient: bool, succeed_on: Option<u32>) -> (bool, u32) {
		let attempts = Arc::new(AtomicU32::new(0));
		let counter = Arc::clone(&attempts);

		let result: Result<(), FlakyError> = retry(cfg, || {
			let counter = Arc::clone(&counter);
			async move {
				let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
				match succeed_on {
					Some(n) if current >= n => Ok(()),
					_ => Err(FlakyError { transient }),
				}
			}
		})
		.await;

		(result.is_ok(), attempts.load(Ordering::SeqCst))
	}

	/// A permanent error (e.g. a rejected payload) must surface after one
	/// attempt; sending it again cannot change the outcome.
	#[tokio::test]
	async fn test_permanent_error_is_not_retried() {
		let (ok, attempts) = count_attempts(&fast_config(5), false, None).await;
		assert!(!ok);
		assert_eq!(attempts, 1);
	}

	#[tokio::test]
	async fn test_transient_error_uses_full_budget() {
		let (ok, attempts) = count_attempts(&fast_config(4), true, None).await;
		assert!(!ok);
		assert_eq!(attempts, 4);
	}

	#[tokio::test]
	async fn test_recovers_after_transient_errors() {
		let (ok, attempts) = count_attempts(&fast_config(5), true, Some(3)).await;
		assert!(ok);
		assert_eq!(attempts, 3);
	}

	#[tokio::test]
	async fn test_no_retry_makes_single_attempt() {
		let (ok, attempts) = count_attempts(&RetryConfig::no_retry(), true, None).await;
		assert!(!ok);
		assert_eq!(attempts, 1);
	}

	#[tokio::test]
	async fn test_zero_attempts_still_tries_once() {
		let (_, attempts) = count_attempts(&fast_config(0), true, None).await;
		assert_eq!(attempts, 1);
	}

	#[test]
	fn test_delay_is_capped() {
		let cfg = RetryConfig {
			max_attempts: 10,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(3),
			backoff_factor: 10.0,
			jitter: false,
		};

		assert_eq!(calculate_delay(&cfg, 0), Duration::from_secs(1));
		assert_eq!(calculate_delay(&cfg, 4), Duration::from_secs(3));
	}

	#[test]
	fn test_jitter_stays_within_half_to_one_and_a_half() {
		let cfg = RetryConfig {
			jitter: true,
			..fast_config(3)
		};
		let base = calculate_delay(&RetryConfig { jitter: false, ..cfg.clone() }, 2);

		for _ in 0..50 {
			let delay = calculate_delay(&cfg, 2);
			assert!(delay >= base.mul_f64(0.5));
			assert!(delay <= base.mul_f64(1.5));
		}
	}

	#[test]
	fn test_malformed_request_is_not_retryable() {
		let err = reqwest::Client::new().get("not a url").build().unwrap_err();
		assert!(err.is_builder());
		assert!(!err.is_retryable());
	}

	#[tokio::test]
	async fn test_refused_connection_is_retryable() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let err = reqwest::get(format!("http://127.0.0.1:{port}/")).await.unwrap_err();
		assert!(err.status().is_none());
		assert!(err.is_retryable());
	}

	#[test]
	fn test_retryable_statuses() {
		for status in RETRYABLE_STATUSES {
			assert!(is_retryable_status(status), "{status} should be retryable");
		}
		for status in [
			StatusCode::BAD_REQUEST,
			StatusCode::UNAUTHORIZED,
			StatusCode::FORBIDDEN,
			StatusCode::NOT_FOUND,
			StatusCode::PAYLOAD_TOO_LARGE,
		] {
			assert!(!is_retryable_status(status), "{status} should not be retryable");
		}
	}
}
