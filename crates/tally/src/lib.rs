// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rust SDK for the Tally analytics ingestion API.
//!
//! Entities are sent immediately when the API is reachable. When a send fails
//! transiently (network down, timeout, 5xx, rate limiting) the entity is
//! buffered in a local store shared by every process on the machine, and a
//! later [`TallyClient::try_send_local_elements`] delivers it in batches.
//!
//! # Example
//!
//! ```ignore
//! use tally::{Properties, TallyClient, UpdateOperation};
//! use serde_json::json;
//!
//! let client = TallyClient::builder()
//!     .token("project-token")
//!     .base_url("https://ingest.example.com")
//!     .build_and_drain()
//!     .await?;
//!
//! client
//!     .track_event("song_played", "user-42", Properties::new().insert("genre", "jazz"))
//!     .await?;
//! client
//!     .engage("user-42", UpdateOperation::Set, json!({"plan": "pro"}))
//!     .await?;
//! client.alias("user-42", "user@example.com").await?;
//!
//! client.shutdown().await?;
//! ```

mod blob;
mod client;
mod config;
mod delivery;
mod error;
mod store;
mod transport;

#[cfg(test)]
mod testing;

pub use blob::{BlobLock, BlobStore, FileBlobStore, MemoryBlobStore, DEFAULT_LOCK_TIMEOUT};
pub use client::{ClientConfig, TallyClient, TallyClientBuilder};
pub use config::{ConfigError, TallyConfig};
pub use delivery::{DeliveryConfig, DeliveryEngine, DrainSummary, TrackOutcome};
pub use error::{DeliveryError, Result, StorageError, TallyError};
pub use store::{LocalStore, PendingCounts, PendingElements};
pub use transport::{HttpTransport, Transport, TransportOptions};

pub use tally_common_http::{RetryConfig, RetryableError};
pub use tally_core::{
	Endpoint, Entity, EntityId, EntityKind, Event, ProfileUpdate, Properties, Trackable,
	UpdateOperation, ValidationError, ALIAS_EVENT, MAX_BATCH_SIZE,
};
