// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable buffer of entities awaiting delivery.
//!
//! Every access runs under the blob lock. A missing, unreadable or corrupt
//! blob loads as empty. [`LocalStore::save`] logs and drops failures;
//! [`LocalStore::transaction`] reports them so callers never claim an
//! element was stored when it was not.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_core::{Entity, EntityId, Event, ProfileUpdate, Trackable};
use tracing::{debug, warn};

use crate::blob::{BlobLock, BlobStore, FileBlobStore, MemoryBlobStore};
use crate::error::StorageError;

/// The persisted record: one list per entity kind, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingElements {
	#[serde(default)]
	pub events: Vec<Event>,
	#[serde(default)]
	pub profile_updates: Vec<ProfileUpdate>,
}

/// Per-kind sizes of the pending buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
	pub events: usize,
	pub profile_updates: usize,
}

impl PendingCounts {
	pub fn total(&self) -> usize {
		self.events + self.profile_updates
	}
}

impl PendingElements {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn contains(&self, entity: &Entity) -> bool {
		match entity {
			Entity::Event(event) => self.events.contains(event),
			Entity::ProfileUpdate(update) => self.profile_updates.contains(update),
		}
	}

	/// Appends to the list matching the entity's kind.
	pub fn add(&mut self, entity: Entity) {
		match entity {
			Entity::Event(event) => self.events.push(event),
			Entity::ProfileUpdate(update) => self.profile_updates.push(update),
		}
	}

	pub fn remove(&mut self, entity: &Entity) -> bool {
		let before = self.len();
		match entity {
			Entity::Event(event) => self.events.retain(|e| e != event),
			Entity::ProfileUpdate(update) => self.profile_updates.retain(|u| u != update),
		}
		self.len() != before
	}

	/// Removes every element whose ID is in `delivered`; returns how many went.
	pub fn remove_delivered(&mut self, delivered: &HashSet<EntityId>) -> usize {
		let before = self.len();
		self.events.retain(|e| !delivered.contains(e.id()));
		self.profile_updates.retain(|u| !delivered.contains(u.id()));
		before - self.len()
	}

	pub fn len(&self) -> usize {
		self.events.len() + self.profile_updates.len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.profile_updates.is_empty()
	}

	pub fn counts(&self) -> PendingCounts {
		PendingCounts {
			events: self.events.len(),
			profile_updates: self.profile_updates.len(),
		}
	}
}

/// Lock-guarded access to the persisted [`PendingElements`].
///
/// Cloning is cheap; clones share the underlying blob.
#[derive(Clone)]
pub struct LocalStore {
	blob: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for LocalStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalStore").finish_non_exhaustive()
	}
}

impl LocalStore {
	pub fn new(blob: Arc<dyn BlobStore>) -> Self {
		Self { blob }
	}

	/// Store backed by a JSON file at `path`.
	pub fn file(path: impl Into<PathBuf>) -> Self {
		Self::new(Arc::new(FileBlobStore::new(path)))
	}

	/// Store backed by the default per-user state file.
	pub fn from_xdg() -> Result<Self, StorageError> {
		Ok(Self::new(Arc::new(FileBlobStore::from_xdg()?)))
	}

	/// Non-persistent store, shared by clones only.
	pub fn memory() -> Self {
		Self::new(Arc::new(MemoryBlobStore::new()))
	}

	/// Reads the current record. Never fails; problems yield an empty record.
	pub async fn load(&self) -> PendingElements {
		match self.blob.lock().await {
			Ok(mut lock) => read_elements(lock.as_mut()).await,
			Err(e) => {
				warn!(error = %e, "Failed to lock pending store, treating as empty");
				PendingElements::default()
			}
		}
	}

	/// Overwrites the record. Failures are logged and swallowed.
	pub async fn save(&self, elements: &PendingElements) {
		let result = match self.blob.lock().await {
			Ok(mut lock) => write_elements(lock.as_mut(), elements).await,
			Err(e) => Err(e),
		};
		if let Err(e) = result {
			warn!(error = %e, "Failed to save pending store");
		}
	}

	/// Runs load, `f`, save as one unit under the lock.
	///
	/// Fails if the lock could not be taken, in which case `f` never runs, or
	/// if the updated record could not be written back. After a failed write
	/// the blob keeps its previous contents and `f`'s changes are discarded.
	pub async fn transaction<F, T>(&self, f: F) -> Result<T, StorageError>
	where
		F: FnOnce(&mut PendingElements) -> T + Send,
		T: Send,
	{
		let mut lock = self.blob.lock().await?;
		let mut elements = read_elements(lock.as_mut()).await;
		let result = f(&mut elements);
		write_elements(lock.as_mut(), &elements).await?;
		Ok(result)
	}

	pub async fn pending_counts(&self) -> PendingCounts {
		self.load().await.counts()
	}
}

async fn read_elements(lock: &mut dyn BlobLock) -> PendingElements {
	let bytes = match lock.read_all().await {
		Ok(Some(bytes)) => bytes,
		Ok(None) => return PendingElements::default(),
		Err(e) => {
			warn!(error = %e, "Failed to read pending store, treating as empty");
			return PendingElements::default();
		}
	};

	match serde_json::from_slice(&bytes) {
		Ok(elements) => elements,
		Err(e) => {
			warn!(error = %e, "Pending store is corrupt, starting fresh");
			PendingElements::default()
		}
	}
}

async fn write_elements(lock: &mut dyn BlobLock, elements: &PendingElements) -> Result<(), StorageError> {
	let bytes = serde_json::to_vec_pretty(elements)?;
	lock.write_all(&bytes).await?;
	debug!(pending = elements.len(), "Saved pending elements");
	Ok(())
}
