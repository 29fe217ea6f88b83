// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Profile updates, delivered to the `engage` endpoint.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{EntityKind, Trackable};
use crate::error::ValidationError;
use crate::id::EntityId;

/// The mutation a profile update applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOperation {
	/// Overwrite properties.
	Set,
	/// Set properties only where they are not yet present.
	SetOnce,
	/// Increment numeric properties.
	Add,
	/// Append values to list properties.
	Append,
	/// Merge values into list properties, skipping duplicates.
	Union,
	/// Remove values from list properties.
	Remove,
	/// Remove properties entirely; the value is a list of names.
	Unset,
	/// Delete the whole profile.
	Delete,
}

impl UpdateOperation {
	pub const ALL: [UpdateOperation; 8] = [
		UpdateOperation::Set,
		UpdateOperation::SetOnce,
		UpdateOperation::Add,
		UpdateOperation::Append,
		UpdateOperation::Union,
		UpdateOperation::Remove,
		UpdateOperation::Unset,
		UpdateOperation::Delete,
	];

	/// Key under which the operation's value is sent.
	pub fn wire_key(&self) -> &'static str {
		match self {
			UpdateOperation::Set => "$set",
			UpdateOperation::SetOnce => "$set_once",
			UpdateOperation::Add => "$add",
			UpdateOperation::Append => "$append",
			UpdateOperation::Union => "$union",
			UpdateOperation::Remove => "$remove",
			UpdateOperation::Unset => "$unset",
			UpdateOperation::Delete => "$delete",
		}
	}

	/// Parses either the wire key (`$set_once`) or the bare name (`set_once`).
	pub fn parse(s: &str) -> Option<Self> {
		let name = s.strip_prefix('$').unwrap_or(s);
		Self::ALL
			.into_iter()
			.find(|op| &op.wire_key()[1..] == name)
	}
}

impl fmt::Display for UpdateOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.wire_key())
	}
}

/// A mutation of the profile identified by `distinct_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
	id: EntityId,
	pub distinct_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	pub time: DateTime<Utc>,
	pub operation: UpdateOperation,
	pub value: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
	#[serde(default)]
	pub ignore_time: bool,
}

impl ProfileUpdate {
	pub fn new(distinct_id: impl Into<String>, operation: UpdateOperation, value: Value) -> Self {
		Self {
			id: EntityId::new(EntityKind::ProfileUpdate),
			distinct_id: distinct_id.into(),
			token: None,
			time: Utc::now(),
			operation,
			value,
			ip: None,
			ignore_time: false,
		}
	}

	pub fn set(distinct_id: impl Into<String>, properties: impl Into<Value>) -> Self {
		Self::new(distinct_id, UpdateOperation::Set, properties.into())
	}

	pub fn unset<I, S>(distinct_id: impl Into<String>, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let names = names.into_iter().map(|n| Value::String(n.into())).collect();
		Self::new(distinct_id, UpdateOperation::Unset, Value::Array(names))
	}

	pub fn delete(distinct_id: impl Into<String>) -> Self {
		Self::new(distinct_id, UpdateOperation::Delete, Value::String(String::new()))
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
		self.time = time;
		self
	}

	pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
		self.ip = Some(ip.into());
		self
	}

	/// Asks the server not to bump the profile's last-seen time.
	pub fn with_ignore_time(mut self, ignore_time: bool) -> Self {
		self.ignore_time = ignore_time;
		self
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.distinct_id.trim().is_empty() {
			return Err(ValidationError::EmptyDistinctId);
		}

		let valid = match self.operation {
			UpdateOperation::Delete => true,
			UpdateOperation::Unset => self
				.value
				.as_array()
				.is_some_and(|names| names.iter().all(Value::is_string)),
			_ => self.value.is_object(),
		};

		if !valid {
			let expected = match self.operation {
				UpdateOperation::Unset => "an array of property names",
				_ => "an object of properties",
			};
			return Err(ValidationError::InvalidOperationValue {
				operation: self.operation,
				expected,
			});
		}

		Ok(())
	}
}

impl Trackable for ProfileUpdate {
	fn id(&self) -> &EntityId {
		&self.id
	}

	fn kind(&self) -> EntityKind {
		EntityKind::ProfileUpdate
	}

	fn flatten(&self) -> Map<String, Value> {
		let mut map = Map::new();
		if let Some(token) = &self.token {
			map.insert("$token".to_string(), Value::String(token.clone()));
		}
		map.insert(
			"$distinct_id".to_string(),
			Value::String(self.distinct_id.clone()),
		);
		map.insert("$time".to_string(), Value::from(self.time.timestamp_millis()));
		if let Some(ip) = &self.ip {
			map.insert("$ip".to_string(), Value::String(ip.clone()));
		}
		if self.ignore_time {
			map.insert("$ignore_time".to_string(), Value::Bool(true));
		}
		map.insert(self.operation.wire_key().to_string(), self.value.clone());
		map
	}
}

impl PartialEq for ProfileUpdate {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ProfileUpdate {}

impl Hash for ProfileUpdate {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl PartialOrd for ProfileUpdate {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for ProfileUpdate {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.id.cmp(&other.id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use serde_json::json;

	#[test]
	fn test_wire_keys() {
		let keys: Vec<&str> = UpdateOperation::ALL.iter().map(|op| op.wire_key()).collect();
		assert_eq!(
			keys,
			[
				"$set",
				"$set_once",
				"$add",
				"$append",
				"$union",
				"$remove",
				"$unset",
				"$delete"
			]
		);
	}

	#[test]
	fn test_parse_accepts_both_spellings() {
		for op in UpdateOperation::ALL {
			assert_eq!(UpdateOperation::parse(op.wire_key()), Some(op));
			assert_eq!(UpdateOperation::parse(&op.wire_key()[1..]), Some(op));
		}
		assert_eq!(UpdateOperation::parse("$merge"), None);
	}

	#[test]
	fn test_flatten_set() {
		let time = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
		let update = ProfileUpdate::set("user-1", json!({"plan": "pro"}))
			.with_token("tok")
			.with_time(time);

		assert_eq!(
			Value::Object(update.flatten()),
			json!({
				"$token": "tok",
				"$distinct_id": "user-1",
				"$time": time.timestamp_millis(),
				"$set": {"plan": "pro"},
			})
		);
	}

	#[test]
	fn test_flatten_optional_fields() {
		let update = ProfileUpdate::delete("user-1")
			.with_ip("203.0.113.9")
			.with_ignore_time(true);

		let flat = update.flatten();
		assert_eq!(flat["$ip"], "203.0.113.9");
		assert_eq!(flat["$ignore_time"], true);
		assert_eq!(flat["$delete"], "");
		assert!(!flat.contains_key("$token"));
	}

	#[test]
	fn test_unset_value_is_name_list() {
		let update = ProfileUpdate::unset("user-1", ["email", "phone"]);
		assert_eq!(update.value, json!(["email", "phone"]));
		assert!(update.validate().is_ok());
	}

	#[test]
	fn test_validation() {
		assert_eq!(
			ProfileUpdate::set("", json!({})).validate(),
			Err(ValidationError::EmptyDistinctId)
		);
		assert!(matches!(
			ProfileUpdate::new("u", UpdateOperation::Add, json!(5)).validate(),
			Err(ValidationError::InvalidOperationValue {
				operation: UpdateOperation::Add,
				..
			})
		));
		assert!(matches!(
			ProfileUpdate::new("u", UpdateOperation::Unset, json!([1, 2])).validate(),
			Err(ValidationError::InvalidOperationValue {
				operation: UpdateOperation::Unset,
				..
			})
		));
		assert!(ProfileUpdate::delete("u").validate().is_ok());
	}
}
