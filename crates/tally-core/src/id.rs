// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::EntityIdError;

/// Identity of a trackable entity.
///
/// Generated once at construction as `{prefix}-{uuid7}`, so ids of one kind
/// sort in creation order. The local store uses it as the dedup and removal key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
	pub fn new(kind: EntityKind) -> Self {
		let uuid = uuid7::uuid7();
		Self(format!("{}-{uuid}", kind.id_prefix()))
	}

	pub fn parse(s: &str) -> Result<Self, EntityIdError> {
		let Some((prefix, uuid_part)) = s.split_once('-') else {
			return Err(EntityIdError::InvalidPrefix(s.chars().take(3).collect()));
		};

		if EntityKind::from_id_prefix(prefix).is_none() {
			return Err(EntityIdError::InvalidPrefix(prefix.to_string()));
		}

		uuid::Uuid::parse_str(uuid_part)?;

		Ok(Self(s.to_string()))
	}

	/// The kind encoded in the id prefix.
	pub fn kind(&self) -> Option<EntityKind> {
		self
			.0
			.split_once('-')
			.and_then(|(prefix, _)| EntityKind::from_id_prefix(prefix))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EntityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for EntityId {
	type Err = EntityIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
