// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP client with consistent User-Agent header.

use reqwest::{Client, ClientBuilder};

/// SDK name reported in the default User-Agent.
pub const SDK_NAME: &str = "tally-rust";
/// SDK version reported in the default User-Agent.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates a new HTTP client builder with the standard Tally User-Agent header.
///
/// # Example
/// ```ignore
/// let client = tally_common_http::builder()
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Creates a new HTTP client builder with a caller-supplied User-Agent header.
///
/// Applications embedding the SDK use this to identify themselves to the
/// ingestion API instead of the SDK default.
pub fn builder_with_user_agent(user_agent: impl Into<String>) -> ClientBuilder {
	Client::builder().user_agent(user_agent.into())
}

/// Returns the platform string in `{os}-{arch}` format, e.g. "linux-x86_64".
pub fn platform() -> String {
	format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Returns the standard Tally User-Agent string.
///
/// Format: `tally-rust/{version} ({platform})`
pub fn user_agent() -> String {
	format!("{SDK_NAME}/{SDK_VERSION} ({})", platform())
}
