// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered client configuration: TOML file, then `TALLY_*` environment
//! variables. Callers apply their own overrides on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_TOKEN: &str = "TALLY_TOKEN";
pub const ENV_BASE_URL: &str = "TALLY_BASE_URL";
pub const ENV_STORE_PATH: &str = "TALLY_STORE_PATH";
pub const ENV_TIMEOUT_SECS: &str = "TALLY_TIMEOUT_SECS";
pub const ENV_VERBOSE: &str = "TALLY_VERBOSE";
pub const ENV_GEOLOCATE: &str = "TALLY_GEOLOCATE";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {name}: {message}")]
	InvalidValue { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Partial client settings. Unset fields fall back to client defaults.
///
/// ```toml
/// token = "project-token"
/// base_url = "https://ingest.example.com"
/// store_path = "/var/lib/myapp/tally-pending.json"
/// timeout_secs = 5
/// verbose = false
/// geolocate = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TallyConfig {
	pub token: Option<String>,
	pub base_url: Option<String>,
	pub store_path: Option<PathBuf>,
	pub timeout_secs: Option<u64>,
	pub verbose: Option<bool>,
	pub geolocate: Option<bool>,
	pub user_agent: Option<String>,
}

impl TallyConfig {
	/// `$XDG_CONFIG_HOME/tally/config.toml`.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("tally").join("config.toml"))
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml(&contents, path)
	}

	fn from_toml(contents: &str, path: &Path) -> Result<Self> {
		toml::from_str(contents).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Loads `path` (which must exist), or the default file if present, then
	/// applies the process environment.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let file_config = match path {
			Some(path) => Self::from_file(path)?,
			None => match Self::default_path() {
				Some(default) if default.is_file() => Self::from_file(&default)?,
				_ => Self::default(),
			},
		};

		file_config.with_env_from(|name| std::env::var(name).ok())
	}

	/// Overlays variables returned by `lookup` onto this config.
	pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(token) = lookup(ENV_TOKEN) {
			self.token = Some(token);
		}
		if let Some(base_url) = lookup(ENV_BASE_URL) {
			self.base_url = Some(base_url);
		}
		if let Some(path) = lookup(ENV_STORE_PATH) {
			self.store_path = Some(PathBuf::from(path));
		}
		if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
			let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
				name: ENV_TIMEOUT_SECS.to_string(),
				message: e.to_string(),
			})?;
			self.timeout_secs = Some(secs);
		}
		if let Some(raw) = lookup(ENV_VERBOSE) {
			self.verbose = Some(parse_bool(ENV_VERBOSE, &raw)?);
		}
		if let Some(raw) = lookup(ENV_GEOLOCATE) {
			self.geolocate = Some(parse_bool(ENV_GEOLOCATE, &raw)?);
		}
		Ok(self)
	}

	/// Fields set in `other` replace those in `self`.
	pub fn merge(self, other: TallyConfig) -> Self {
		Self {
			token: other.token.or(self.token),
			base_url: other.base_url.or(self.base_url),
			store_path: other.store_path.or(self.store_path),
			timeout_secs: other.timeout_secs.or(self.timeout_secs),
			verbose: other.verbose.or(self.verbose),
			geolocate: other.geolocate.or(self.geolocate),
			user_agent: other.user_agent.or(self.user_agent),
		}
	}
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		other => Err(ConfigError::InvalidValue {
			name: name.to_string(),
			message: format!("expected a boolean, got '{other}'"),
		}),
	}
}
