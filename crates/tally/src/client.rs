// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Analytics client for reporting events and profile updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tally_common_http::RetryConfig;
use tally_core::{Entity, Event, ProfileUpdate, Properties, Trackable, UpdateOperation};
use tracing::{debug, info};

use crate::config::TallyConfig;
use crate::delivery::{
	DeliveryConfig, DeliveryEngine, DrainSummary, TrackOutcome, DEFAULT_REQUEST_TIMEOUT,
};
use crate::error::{Result, TallyError};
use crate::store::{LocalStore, PendingCounts};
use crate::transport::{HttpTransport, Transport, TransportOptions};

/// Configuration for the analytics client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Upper bound on each send attempt.
	pub request_timeout: Duration,
	/// Retry policy for immediate sends. Defaults to a single attempt.
	pub retry_config: RetryConfig,
	/// Request verbose responses from the ingestion API.
	pub verbose: bool,
	/// Let the server geolocate events from the request IP.
	pub geolocate: bool,
	/// Overrides the default `tally-rust/<version> (<os>-<arch>)` agent.
	pub user_agent: Option<String>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			retry_config: RetryConfig::no_retry(),
			verbose: false,
			geolocate: true,
			user_agent: None,
		}
	}
}

/// Builder for constructing a [`TallyClient`].
pub struct TallyClientBuilder {
	token: Option<String>,
	base_url: Option<String>,
	config: ClientConfig,
	store: Option<LocalStore>,
	transport: Option<Arc<dyn Transport>>,
}

impl TallyClientBuilder {
	pub fn new() -> Self {
		Self {
			token: None,
			base_url: None,
			config: ClientConfig::default(),
			store: None,
			transport: None,
		}
	}

	/// Seeds a builder from file/env configuration. Builder calls made
	/// afterwards take precedence.
	pub fn from_config(config: &TallyConfig) -> Self {
		let mut builder = Self::new();
		builder.token = config.token.clone();
		builder.base_url = config.base_url.clone();
		if let Some(secs) = config.timeout_secs {
			builder.config.request_timeout = Duration::from_secs(secs);
		}
		if let Some(verbose) = config.verbose {
			builder.config.verbose = verbose;
		}
		if let Some(geolocate) = config.geolocate {
			builder.config.geolocate = geolocate;
		}
		builder.config.user_agent = config.user_agent.clone();
		if let Some(path) = &config.store_path {
			builder.store = Some(LocalStore::file(path));
		}
		builder
	}

	/// Sets the project token sent with every entity.
	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	/// Sets the ingestion API base URL.
	///
	/// Example: `https://ingest.example.com`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn retry_config(mut self, config: RetryConfig) -> Self {
		self.config.retry_config = config;
		self
	}

	pub fn verbose(mut self, verbose: bool) -> Self {
		self.config.verbose = verbose;
		self
	}

	pub fn geolocate(mut self, geolocate: bool) -> Self {
		self.config.geolocate = geolocate;
		self
	}

	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.user_agent = Some(user_agent.into());
		self
	}

	/// Uses `store` for buffering instead of the per-user state file.
	pub fn store(mut self, store: LocalStore) -> Self {
		self.store = Some(store);
		self
	}

	/// Replaces the HTTP transport. A base URL is then optional.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Builds the client. Performs no I/O.
	pub fn build(self) -> Result<TallyClient> {
		let token = self
			.token
			.filter(|t| !t.trim().is_empty())
			.ok_or(TallyError::MissingToken)?;

		let (transport, base_url) = match self.transport {
			Some(transport) => (transport, None),
			None => {
				let raw = self
					.base_url
					.ok_or_else(|| TallyError::InvalidBaseUrl("base URL is required".to_string()))?;
				let base_url = normalize_base_url(&raw)?;

				let http_client = match &self.config.user_agent {
					Some(agent) => tally_common_http::builder_with_user_agent(agent),
					None => tally_common_http::builder(),
				}
				.timeout(self.config.request_timeout)
				.build()
				.map_err(TallyError::HttpClient)?;

				let options = TransportOptions {
					verbose: self.config.verbose,
					geolocate: self.config.geolocate,
				};
				let transport: Arc<dyn Transport> =
					Arc::new(HttpTransport::new(base_url.clone(), http_client, options));
				(transport, Some(base_url))
			}
		};

		let store = match self.store {
			Some(store) => store,
			None => LocalStore::from_xdg()?,
		};

		let engine = DeliveryEngine::new(
			transport,
			store,
			DeliveryConfig {
				request_timeout: self.config.request_timeout,
				retry_config: self.config.retry_config.clone(),
			},
		);

		info!(
			base_url = base_url.as_deref().unwrap_or("<custom transport>"),
			"Tally client initialized"
		);

		Ok(TallyClient {
			inner: Arc::new(TallyClientInner {
				token,
				config: self.config,
				engine,
				closed: AtomicBool::new(false),
			}),
		})
	}

	/// Builds the client and sends anything left pending by earlier runs.
	///
	/// # Example
	///
	/// ```ignore
	/// let client = TallyClient::builder()
	///     .token("project-token")
	///     .base_url("https://ingest.example.com")
	///     .build_and_drain()
	///     .await?;
	/// ```
	pub async fn build_and_drain(self) -> Result<TallyClient> {
		let client = self.build()?;
		client.try_send_local_elements().await?;
		Ok(client)
	}
}

impl Default for TallyClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Trims trailing slashes and checks that the URL is absolute http(s).
fn normalize_base_url(raw: &str) -> Result<String> {
	let trimmed = raw.trim().trim_end_matches('/');
	let parsed =
		url::Url::parse(trimmed).map_err(|e| TallyError::InvalidBaseUrl(format!("{raw}: {e}")))?;
	match parsed.scheme() {
		"http" | "https" => Ok(trimmed.to_string()),
		other => Err(TallyError::InvalidBaseUrl(format!("unsupported scheme '{other}'"))),
	}
}

struct TallyClientInner {
	token: String,
	config: ClientConfig,
	engine: DeliveryEngine,
	closed: AtomicBool,
}

/// Client for the analytics ingestion API.
///
/// Cheap to clone; clones share the store, transport and shutdown state.
///
/// ```ignore
/// let client = TallyClient::builder()
///     .token("project-token")
///     .base_url("https://ingest.example.com")
///     .build()?;
///
/// client
///     .track_event("signup", "user-42", Properties::new().insert("plan", "pro"))
///     .await?;
/// ```
#[derive(Clone)]
pub struct TallyClient {
	inner: Arc<TallyClientInner>,
}

impl TallyClient {
	pub fn builder() -> TallyClientBuilder {
		TallyClientBuilder::new()
	}

	pub fn token(&self) -> &str {
		&self.inner.token
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	pub fn store(&self) -> &LocalStore {
		self.inner.engine.store()
	}

	/// An event stamped with this client's token.
	pub fn event(&self, name: impl Into<String>) -> Event {
		Event::new(name).with_token(self.inner.token.clone())
	}

	/// A profile update stamped with this client's token.
	pub fn profile_update(
		&self,
		distinct_id: impl Into<String>,
		operation: UpdateOperation,
		value: Value,
	) -> ProfileUpdate {
		ProfileUpdate::new(distinct_id, operation, value).with_token(self.inner.token.clone())
	}

	/// Sends an entity now, or buffers it if the API is unreachable.
	///
	/// Returns [`TallyError::InvalidArgument`] before any I/O if the entity is
	/// malformed, and [`TallyError::Delivery`] if the API refused it.
	pub async fn track(&self, entity: impl Into<Entity>) -> Result<TrackOutcome> {
		self.check_closed()?;
		let entity = self.prepare(entity.into())?;
		Ok(self.inner.engine.track(entity).await?)
	}

	pub async fn track_event(
		&self,
		name: impl AsRef<str>,
		distinct_id: impl Into<String>,
		properties: impl Into<Properties>,
	) -> Result<TrackOutcome> {
		let event = self
			.event(name.as_ref())
			.with_distinct_id(distinct_id)
			.with_properties(properties);
		self.track(event).await
	}

	pub async fn engage(
		&self,
		distinct_id: impl Into<String>,
		operation: UpdateOperation,
		value: Value,
	) -> Result<TrackOutcome> {
		self.track(self.profile_update(distinct_id, operation, value)).await
	}

	/// Links `alias` to `distinct_id`.
	pub async fn alias(
		&self,
		distinct_id: impl Into<String>,
		alias: impl Into<String>,
	) -> Result<TrackOutcome> {
		self.track(Event::alias(distinct_id, alias)).await
	}

	/// Buffers an entity without attempting to send it.
	///
	/// Returns `false` if it was already pending, and
	/// [`TallyError::Storage`] if the local store could not be updated.
	pub async fn save_element(&self, entity: impl Into<Entity>) -> Result<bool> {
		self.check_closed()?;
		let entity = self.prepare(entity.into())?;
		Ok(self.inner.engine.save_element(entity).await?)
	}

	/// Sends everything pending in the local store, in batches.
	///
	/// Delivery failures are logged and leave items pending; only a shut-down
	/// client returns an error.
	pub async fn try_send_local_elements(&self) -> Result<DrainSummary> {
		self.check_closed()?;
		Ok(self.inner.engine.try_send_local_elements().await)
	}

	pub async fn pending_counts(&self) -> PendingCounts {
		self.inner.engine.store().pending_counts().await
	}

	/// Stops the client. Later operations return [`TallyError::ClientShutdown`];
	/// pending elements stay in the store for the next client.
	pub async fn shutdown(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		let pending = self.pending_counts().await;
		info!(
			pending_events = pending.events,
			pending_profile_updates = pending.profile_updates,
			"Tally client shutdown"
		);
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(TallyError::ClientShutdown);
		}
		Ok(())
	}

	fn prepare(&self, mut entity: Entity) -> Result<Entity> {
		entity.validate()?;
		entity.set_token_if_missing(&self.inner.token);
		debug!(entity_id = %entity.id(), "Entity prepared");
		Ok(entity)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::blob::MemoryBlobStore;
	use crate::error::DeliveryError;
	use crate::testing::{FailingBlobStore, MockTransport, Reply};
	use serde_json::json;
	use tally_core::{Endpoint, ValidationError};

	fn client_with(transport: Arc<MockTransport>) -> TallyClient {
		TallyClient::builder()
			.token("project-token")
			.transport(transport)
			.store(LocalStore::memory())
			.build()
			.unwrap()
	}

	#[test]
	fn test_builder_requires_token() {
		let result = TallyClient::builder()
			.base_url("https://ingest.example.com")
			.store(LocalStore::memory())
			.build();
		assert!(matches!(result, Err(TallyError::MissingToken)));

		let result = TallyClient::builder()
			.token("   ")
			.base_url("https://ingest.example.com")
			.store(LocalStore::memory())
			.build();
		assert!(matches!(result, Err(TallyError::MissingToken)));
	}

	#[test]
	fn test_builder_requires_base_url_without_transport() {
		let result = TallyClient::builder()
			.token("t")
			.store(LocalStore::memory())
			.build();
		assert!(matches!(result, Err(TallyError::InvalidBaseUrl(_))));
	}

	#[test]
	fn test_builder_rejects_bad_urls() {
		for url in ["not a url", "ftp://ingest.example.com"] {
			let result = TallyClient::builder()
				.token("t")
				.base_url(url)
				.store(LocalStore::memory())
				.build();
			assert!(matches!(result, Err(TallyError::InvalidBaseUrl(_))), "{url}");
		}
	}

	#[test]
	fn test_normalize_base_url() {
		assert_eq!(
			normalize_base_url("https://ingest.example.com///").unwrap(),
			"https://ingest.example.com"
		);
		assert_eq!(
			normalize_base_url("http://localhost:8080/api/").unwrap(),
			"http://localhost:8080/api"
		);
	}

	#[test]
	fn test_builder_from_config() {
		let config = TallyConfig {
			token: Some("from-config".to_string()),
			base_url: Some("https://ingest.example.com".to_string()),
			timeout_secs: Some(3),
			geolocate: Some(false),
			..TallyConfig::default()
		};

		let client = TallyClientBuilder::from_config(&config)
			.verbose(true)
			.store(LocalStore::memory())
			.build()
			.unwrap();

		assert_eq!(client.token(), "from-config");
		assert_eq!(client.config().request_timeout, Duration::from_secs(3));
		assert!(!client.config().geolocate);
		assert!(client.config().verbose);
	}

	#[tokio::test]
	async fn test_track_stamps_token() {
		let transport = Arc::new(MockTransport::new());
		let client = client_with(transport.clone());

		let outcome = client
			.track_event("signup", "user-1", json!({"plan": "pro"}))
			.await
			.unwrap();

		assert_eq!(outcome, TrackOutcome::Sent);
		let singles = transport.singles.lock().unwrap();
		assert_eq!(singles[0].1["properties"]["token"], "project-token");
		assert_eq!(singles[0].1["properties"]["distinct_id"], "user-1");
		assert_eq!(singles[0].1["properties"]["plan"], "pro");
	}

	#[tokio::test]
	async fn test_explicit_token_is_kept() {
		let transport = Arc::new(MockTransport::new());
		let client = client_with(transport.clone());

		client
			.track(Event::new("x").with_token("other-project"))
			.await
			.unwrap();

		let singles = transport.singles.lock().unwrap();
		assert_eq!(singles[0].1["properties"]["token"], "other-project");
	}

	#[tokio::test]
	async fn test_invalid_entity_fails_before_io() {
		let transport = Arc::new(MockTransport::new());
		let client = client_with(transport.clone());

		let err = client.track(Event::new("")).await.unwrap_err();
		assert!(matches!(
			err,
			TallyError::InvalidArgument(ValidationError::EmptyEventName)
		));

		let err = client
			.engage("user-1", UpdateOperation::Set, json!("not an object"))
			.await
			.unwrap_err();
		assert!(matches!(err, TallyError::InvalidArgument(_)));

		assert_eq!(transport.single_calls(), 0);
		assert_eq!(client.pending_counts().await.total(), 0);
	}

	#[tokio::test]
	async fn test_alias_goes_to_track_endpoint() {
		let transport = Arc::new(MockTransport::new());
		let client = client_with(transport.clone());

		client.alias("anon-1", "user@example.com").await.unwrap();

		let singles = transport.singles.lock().unwrap();
		assert_eq!(singles[0].0, Endpoint::Track);
		assert_eq!(singles[0].1["event"], "$create_alias");
		assert_eq!(singles[0].1["properties"]["alias"], "user@example.com");
		assert_eq!(singles[0].1["properties"]["distinct_id"], "anon-1");
	}

	#[tokio::test]
	async fn test_alias_requires_both_ids() {
		let client = client_with(Arc::new(MockTransport::new()));
		assert!(matches!(
			client.alias("anon-1", "").await,
			Err(TallyError::InvalidArgument(ValidationError::EmptyAlias))
		));
	}

	#[tokio::test]
	async fn test_engage_buffers_when_offline() {
		let transport = Arc::new(MockTransport::new().reply_with(Reply::Unavailable));
		let client = client_with(transport);

		let outcome = client
			.engage("user-9", UpdateOperation::Add, json!({"visits": 1}))
			.await
			.unwrap();

		assert_eq!(outcome, TrackOutcome::Buffered);
		assert_eq!(
			client.pending_counts().await,
			PendingCounts {
				events: 0,
				profile_updates: 1
			}
		);
	}

	#[tokio::test]
	async fn test_fatal_rejection_surfaces() {
		let transport = Arc::new(MockTransport::new().reply_with(Reply::BadRequest));
		let client = client_with(transport);

		let err = client.track(client.event("x")).await.unwrap_err();
		assert!(matches!(
			err,
			TallyError::Delivery(DeliveryError::ServerError { status: 400, .. })
		));
		assert_eq!(client.pending_counts().await.total(), 0);
	}

	#[tokio::test]
	async fn test_save_element_stamps_and_dedupes() {
		let client = client_with(Arc::new(MockTransport::new()));
		let event = Event::new("later");

		assert!(client.save_element(event.clone()).await.unwrap());
		assert!(!client.save_element(event).await.unwrap());

		let pending = client.store().load().await;
		assert_eq!(pending.events.len(), 1);
		assert_eq!(pending.events[0].token.as_deref(), Some("project-token"));
	}

	#[tokio::test]
	async fn test_build_and_drain_sends_leftovers() {
		let blob = MemoryBlobStore::new();
		let store = LocalStore::new(Arc::new(blob.clone()));
		store
			.transaction(|pending| {
				pending.add(Event::new("left-over").with_token("project-token").into());
			})
			.await
			.unwrap();

		let transport = Arc::new(MockTransport::new());
		let client = TallyClient::builder()
			.token("project-token")
			.transport(transport.clone())
			.store(store)
			.build_and_drain()
			.await
			.unwrap();

		assert_eq!(transport.batch_sizes(), vec![1]);
		assert_eq!(client.pending_counts().await.total(), 0);
	}

	#[tokio::test]
	async fn test_shutdown_is_idempotent_and_blocks_operations() {
		let client = client_with(Arc::new(MockTransport::new()));

		client.shutdown().await.unwrap();
		client.shutdown().await.unwrap();
		assert!(client.is_closed());

		assert!(matches!(
			client.track(client.event("x")).await,
			Err(TallyError::ClientShutdown)
		));
		assert!(matches!(
			client.try_send_local_elements().await,
			Err(TallyError::ClientShutdown)
		));
	}

	#[tokio::test]
	async fn test_clones_share_shutdown() {
		let client = client_with(Arc::new(MockTransport::new()));
		let clone = client.clone();

		client.shutdown().await.unwrap();
		assert!(clone.is_closed());
	}

	#[tokio::test]
	async fn test_storage_failures_are_reported_not_hidden() {
		let transport = Arc::new(MockTransport::new().reply_with(Reply::Unavailable));
		let blob = FailingBlobStore::new();
		blob.fail_writes(true);
		let client = TallyClient::builder()
			.token("project-token")
			.transport(transport)
			.store(LocalStore::new(Arc::new(blob)))
			.build()
			.unwrap();

		let saved = client.save_element(client.event("queued")).await;
		assert!(matches!(saved, Err(TallyError::Storage(_))));

		let outcome = client.track(client.event("opened")).await.unwrap();
		assert_eq!(outcome, TrackOutcome::Dropped);
		assert_eq!(client.pending_counts().await.total(), 0);
	}
}
