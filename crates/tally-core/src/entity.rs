// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The trackable entity abstraction and its routing.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::event::Event;
use crate::id::EntityId;
use crate::profile::ProfileUpdate;

/// Remote ingestion endpoint an entity is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
	Track,
	Engage,
}

impl Endpoint {
	/// Path segment used in request URLs.
	pub fn as_str(&self) -> &'static str {
		match self {
			Endpoint::Track => "track",
			Endpoint::Engage => "engage",
		}
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The concrete variant of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	Event,
	ProfileUpdate,
}

impl EntityKind {
	pub fn endpoint(&self) -> Endpoint {
		match self {
			EntityKind::Event => Endpoint::Track,
			EntityKind::ProfileUpdate => Endpoint::Engage,
		}
	}

	pub(crate) fn id_prefix(&self) -> &'static str {
		match self {
			EntityKind::Event => "ev",
			EntityKind::ProfileUpdate => "pu",
		}
	}

	pub(crate) fn from_id_prefix(prefix: &str) -> Option<Self> {
		match prefix {
			"ev" => Some(EntityKind::Event),
			"pu" => Some(EntityKind::ProfileUpdate),
			_ => None,
		}
	}
}

/// Something the delivery pipeline can send and buffer.
pub trait Trackable {
	fn id(&self) -> &EntityId;

	fn kind(&self) -> EntityKind;

	fn endpoint(&self) -> Endpoint {
		self.kind().endpoint()
	}

	/// Wire-ready representation. Pure; calling it twice yields the same map.
	fn flatten(&self) -> Map<String, Value>;
}

/// An event or a profile update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
	Event(Event),
	ProfileUpdate(ProfileUpdate),
}

impl Entity {
	pub fn validate(&self) -> Result<(), ValidationError> {
		match self {
			Entity::Event(event) => event.validate(),
			Entity::ProfileUpdate(update) => update.validate(),
		}
	}

	pub fn token(&self) -> Option<&str> {
		match self {
			Entity::Event(event) => event.token.as_deref(),
			Entity::ProfileUpdate(update) => update.token.as_deref(),
		}
	}

	/// Stamps `token` onto the entity unless it already carries one.
	pub fn set_token_if_missing(&mut self, token: &str) {
		let slot = match self {
			Entity::Event(event) => &mut event.token,
			Entity::ProfileUpdate(update) => &mut update.token,
		};
		if slot.is_none() {
			*slot = Some(token.to_string());
		}
	}
}

impl Trackable for Entity {
	fn id(&self) -> &EntityId {
		match self {
			Entity::Event(event) => event.id(),
			Entity::ProfileUpdate(update) => update.id(),
		}
	}

	fn kind(&self) -> EntityKind {
		match self {
			Entity::Event(_) => EntityKind::Event,
			Entity::ProfileUpdate(_) => EntityKind::ProfileUpdate,
		}
	}

	fn flatten(&self) -> Map<String, Value> {
		match self {
			Entity::Event(event) => event.flatten(),
			Entity::ProfileUpdate(update) => update.flatten(),
		}
	}
}

impl PartialOrd for Entity {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Entity {
	fn cmp(&self, other: &Self) -> Ordering {
		self
			.id()
			.cmp(other.id())
			.then_with(|| self.kind().cmp(&other.kind()))
	}
}

impl From<Event> for Entity {
	fn from(event: Event) -> Self {
		Entity::Event(event)
	}
}

impl From<ProfileUpdate> for Entity {
	fn from(update: ProfileUpdate) -> Self {
		Entity::ProfileUpdate(update)
	}
}
