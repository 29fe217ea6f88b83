// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The delivery pipeline: immediate send with store fallback, and the
//! chunked drain of the store.
//!
//! # Drain protocol
//!
//! 1. Load a snapshot of the store.
//! 2. Send events, then profile updates, in chunks of
//!    [`MAX_BATCH_SIZE`], one chunk at a time. A failed chunk is logged and
//!    left in the store; later chunks are still attempted.
//! 3. Under the lock, reload the store and remove the IDs of every delivered
//!    item. Items buffered while the network phase ran are kept.
//!
//! An empty snapshot ends the drain without touching the store again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tally_common_http::{retry, RetryConfig, RetryableError};
use tally_core::{wire, Endpoint, Entity, EntityId, Trackable, MAX_BATCH_SIZE};
use tracing::{debug, info, instrument, warn};

use crate::error::{DeliveryError, StorageError};
use crate::store::LocalStore;
use crate::transport::Transport;

/// Default bound on a single send.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
	/// Upper bound on each send attempt, single or batch.
	pub request_timeout: Duration,
	/// Policy for the single-item path. Batches are attempted once per drain.
	pub retry_config: RetryConfig,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			retry_config: RetryConfig::no_retry(),
		}
	}
}

/// How a successful `track` call disposed of the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
	/// The server accepted it.
	Sent,
	/// The send failed transiently; the entity is in the local store.
	Buffered,
	/// The send failed transiently and the local store could not take the
	/// entity either. It is lost.
	Dropped,
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
	/// Chunks attempted.
	pub chunks: usize,
	/// Chunks that failed and stay pending.
	pub failed_chunks: usize,
	/// Items the server accepted. They stay in the store if removing them
	/// failed, and are sent again by a later drain.
	pub delivered: usize,
	/// Items left in the store afterwards.
	pub remaining: usize,
}

/// Sends entities through a [`Transport`], buffering in a [`LocalStore`].
pub struct DeliveryEngine {
	transport: Arc<dyn Transport>,
	store: LocalStore,
	config: DeliveryConfig,
}

impl DeliveryEngine {
	pub fn new(transport: Arc<dyn Transport>, store: LocalStore, config: DeliveryConfig) -> Self {
		Self {
			transport,
			store,
			config,
		}
	}

	pub fn store(&self) -> &LocalStore {
		&self.store
	}

	pub fn config(&self) -> &DeliveryConfig {
		&self.config
	}

	/// Sends `entity` now; on a transient failure buffers it instead.
	///
	/// Fatal failures (rejections, client errors, encoding) are returned and
	/// the entity is not buffered.
	#[instrument(skip(self, entity), fields(entity_id = %entity.id(), endpoint = %entity.endpoint()))]
	pub async fn track(&self, entity: Entity) -> Result<TrackOutcome, DeliveryError> {
		let encoded = wire::encode_single(&entity)?;
		let payload = encoded.as_str();
		let endpoint = entity.endpoint();

		let result = retry(&self.config.retry_config, || self.send_once(endpoint, payload)).await;

		match result {
			Ok(()) => {
				debug!("Entity delivered");
				Ok(TrackOutcome::Sent)
			}
			Err(e) if e.is_retryable() => {
				warn!(error = %e, "Delivery failed, buffering for later");
				match self.save_element(entity).await {
					Ok(_) => Ok(TrackOutcome::Buffered),
					Err(_) => {
						warn!("Entity was neither delivered nor buffered and is lost");
						Ok(TrackOutcome::Dropped)
					}
				}
			}
			Err(e) => {
				warn!(error = %e, "Delivery failed permanently, not buffering");
				Err(e)
			}
		}
	}

	/// Adds `entity` to the store unless an equal one is already pending.
	///
	/// Returns `Ok(false)` if it was already pending. An error means the store
	/// could not be updated and does not hold the entity.
	pub async fn save_element(&self, entity: Entity) -> Result<bool, StorageError> {
		let entity_id = entity.id().clone();

		let added = self
			.store
			.transaction(move |pending| {
				if pending.contains(&entity) {
					false
				} else {
					pending.add(entity);
					true
				}
			})
			.await;

		match &added {
			Ok(true) => debug!(%entity_id, "Entity buffered"),
			Ok(false) => debug!(%entity_id, "Entity already pending"),
			Err(e) => warn!(%entity_id, error = %e, "Entity could not be buffered"),
		}
		added
	}

	/// Drains the store. Never fails; see the module docs.
	#[instrument(skip(self))]
	pub async fn try_send_local_elements(&self) -> DrainSummary {
		let snapshot = self.store.load().await;
		if snapshot.is_empty() {
			debug!("No pending elements");
			return DrainSummary::default();
		}

		info!(
			events = snapshot.events.len(),
			profile_updates = snapshot.profile_updates.len(),
			"Sending pending elements"
		);

		let mut summary = DrainSummary::default();
		let mut delivered = HashSet::new();
		self.drain_items(Endpoint::Track, &snapshot.events, &mut delivered, &mut summary)
			.await;
		self.drain_items(
			Endpoint::Engage,
			&snapshot.profile_updates,
			&mut delivered,
			&mut summary,
		)
		.await;

		let delivered_count = delivered.len();
		let remaining = self
			.store
			.transaction(move |pending| {
				pending.remove_delivered(&delivered);
				pending.len()
			})
			.await;

		summary.delivered = delivered_count;
		summary.remaining = match remaining {
			Ok(remaining) => remaining,
			Err(e) => {
				warn!(error = %e, "Failed to remove delivered elements; they stay pending");
				snapshot.len()
			}
		};

		info!(
			chunks = summary.chunks,
			failed_chunks = summary.failed_chunks,
			delivered = summary.delivered,
			remaining = summary.remaining,
			"Drain finished"
		);
		summary
	}

	async fn drain_items<T: Trackable + Sync>(
		&self,
		endpoint: Endpoint,
		items: &[T],
		delivered: &mut HashSet<EntityId>,
		summary: &mut DrainSummary,
	) {
		for (index, chunk) in items.chunks(MAX_BATCH_SIZE).enumerate() {
			summary.chunks += 1;

			let result = match wire::encode_batch(chunk) {
				Ok(payload) => self.send_batch_once(endpoint, &payload).await,
				Err(e) => Err(e.into()),
			};

			match result {
				Ok(()) => {
					debug!(%endpoint, chunk = index, size = chunk.len(), "Chunk delivered");
					delivered.extend(chunk.iter().map(|item| item.id().clone()));
				}
				Err(e) => {
					summary.failed_chunks += 1;
					warn!(
						%endpoint,
						chunk = index,
						size = chunk.len(),
						error = %e,
						retryable = e.is_retryable(),
						"Chunk failed, keeping it pending"
					);
				}
			}
		}
	}

	async fn send_once(&self, endpoint: Endpoint, payload: &str) -> Result<(), DeliveryError> {
		let timeout = self.config.request_timeout;
		tokio::time::timeout(timeout, self.transport.send(endpoint, payload))
			.await
			.unwrap_or(Err(DeliveryError::Timeout(timeout)))
	}

	async fn send_batch_once(&self, endpoint: Endpoint, payload: &str) -> Result<(), DeliveryError> {
		let timeout = self.config.request_timeout;
		tokio::time::timeout(timeout, self.transport.send_batch(endpoint, payload))
			.await
			.unwrap_or(Err(DeliveryError::Timeout(timeout)))
	}
}
