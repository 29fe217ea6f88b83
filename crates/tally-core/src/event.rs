// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Discrete events, delivered to the `track` endpoint.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{EntityKind, Trackable};
use crate::error::ValidationError;
use crate::id::EntityId;
use crate::properties::Properties;

/// Name of the event that links two distinct IDs.
pub const ALIAS_EVENT: &str = "$create_alias";

/// A discrete occurrence reported by the application.
///
/// # Example
///
/// ```
/// use tally_core::{Event, Properties};
///
/// let event = Event::new("checkout_completed")
///     .with_distinct_id("user-42")
///     .with_properties(Properties::new().insert("total", 99.5));
/// assert_eq!(event.name, "checkout_completed");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	id: EntityId,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub distinct_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	pub time: DateTime<Utc>,
	#[serde(default)]
	pub properties: Properties,
}

impl Event {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			id: EntityId::new(EntityKind::Event),
			name: name.into(),
			distinct_id: None,
			token: None,
			time: Utc::now(),
			properties: Properties::new(),
		}
	}

	/// Builds the `$create_alias` event linking `alias` to `distinct_id`.
	pub fn alias(distinct_id: impl Into<String>, alias: impl Into<String>) -> Self {
		let distinct_id = distinct_id.into();
		Self::new(ALIAS_EVENT)
			.with_distinct_id(distinct_id)
			.with_properties(Properties::new().insert("alias", alias.into()))
	}

	pub fn with_distinct_id(mut self, distinct_id: impl Into<String>) -> Self {
		self.distinct_id = Some(distinct_id.into());
		self
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
		self.time = time;
		self
	}

	/// Merges `properties` into the event; later values win.
	pub fn with_properties(mut self, properties: impl Into<Properties>) -> Self {
		self.properties = std::mem::take(&mut self.properties).merge(properties.into());
		self
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.name.trim().is_empty() {
			return Err(ValidationError::EmptyEventName);
		}

		if self.name == ALIAS_EVENT {
			if self.distinct_id.as_deref().map_or(true, str::is_empty) {
				return Err(ValidationError::EmptyDistinctId);
			}
			let alias = self.properties.get("alias").and_then(Value::as_str);
			if alias.map_or(true, str::is_empty) {
				return Err(ValidationError::EmptyAlias);
			}
		}

		Ok(())
	}
}

impl Trackable for Event {
	fn id(&self) -> &EntityId {
		&self.id
	}

	fn kind(&self) -> EntityKind {
		EntityKind::Event
	}

	fn flatten(&self) -> Map<String, Value> {
		let mut properties = self.properties.clone().into_map();

		// Reserved keys are written last so user properties cannot shadow them.
		if let Some(token) = &self.token {
			properties.insert("token".to_string(), Value::String(token.clone()));
		}
		if let Some(distinct_id) = &self.distinct_id {
			properties.insert("distinct_id".to_string(), Value::String(distinct_id.clone()));
		}
		properties.insert("time".to_string(), Value::from(self.time.timestamp()));

		let mut map = Map::new();
		map.insert("event".to_string(), Value::String(self.name.clone()));
		map.insert("properties".to_string(), Value::Object(properties));
		map
	}
}

impl PartialEq for Event {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for Event {}

impl Hash for Event {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl PartialOrd for Event {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Event {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.id.cmp(&other.id)
	}
}
