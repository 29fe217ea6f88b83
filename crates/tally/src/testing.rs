// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scriptable in-memory transport and blob store shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tally_core::{wire, Endpoint};

use crate::blob::{BlobLock, BlobStore, MemoryBlobStore};
use crate::error::{DeliveryError, StorageError};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
	Accept,
	/// 503, retryable.
	Unavailable,
	/// 400, fatal.
	BadRequest,
}

impl Reply {
	fn into_result(self) -> Result<(), DeliveryError> {
		match self {
			Reply::Accept => Ok(()),
			Reply::Unavailable => Err(DeliveryError::ServerError {
				status: 503,
				message: "unavailable".to_string(),
			}),
			Reply::BadRequest => Err(DeliveryError::ServerError {
				status: 400,
				message: "bad request".to_string(),
			}),
		}
	}
}

#[derive(Default)]
pub(crate) struct MockTransport {
	single_replies: Mutex<VecDeque<Reply>>,
	batch_replies: Mutex<VecDeque<Reply>>,
	default_reply: Mutex<Option<Reply>>,
	delay: Mutex<Option<Duration>>,
	pub singles: Mutex<Vec<(Endpoint, Value)>>,
	pub batches: Mutex<Vec<(Endpoint, Vec<Value>)>>,
	single_calls: AtomicUsize,
	batch_calls: AtomicUsize,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reply used once the scripted queues are exhausted. Defaults to accept.
	pub fn reply_with(self, reply: Reply) -> Self {
		*self.default_reply.lock().unwrap() = Some(reply);
		self
	}

	pub fn script_singles(self, replies: impl IntoIterator<Item = Reply>) -> Self {
		self.single_replies.lock().unwrap().extend(replies);
		self
	}

	pub fn script_batches(self, replies: impl IntoIterator<Item = Reply>) -> Self {
		self.batch_replies.lock().unwrap().extend(replies);
		self
	}

	pub fn with_delay(self, delay: Duration) -> Self {
		*self.delay.lock().unwrap() = Some(delay);
		self
	}

	pub fn set_default_reply(&self, reply: Reply) {
		*self.default_reply.lock().unwrap() = Some(reply);
	}

	pub fn single_calls(&self) -> usize {
		self.single_calls.load(Ordering::SeqCst)
	}

	pub fn batch_calls(&self) -> usize {
		self.batch_calls.load(Ordering::SeqCst)
	}

	pub fn batch_sizes(&self) -> Vec<usize> {
		self.batches.lock().unwrap().iter().map(|(_, b)| b.len()).collect()
	}

	fn next_reply(&self, queue: &Mutex<VecDeque<Reply>>) -> Reply {
		queue
			.lock()
			.unwrap()
			.pop_front()
			.or(*self.default_reply.lock().unwrap())
			.unwrap_or(Reply::Accept)
	}

	async fn pause(&self) {
		let delay = *self.delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn send(&self, endpoint: Endpoint, data: &str) -> Result<(), DeliveryError> {
		self.single_calls.fetch_add(1, Ordering::SeqCst);
		self.pause().await;

		let reply = self.next_reply(&self.single_replies);
		if reply == Reply::Accept {
			let payload = wire::decode(data).unwrap();
			self.singles.lock().unwrap().push((endpoint, payload));
		}
		reply.into_result()
	}

	async fn send_batch(&self, endpoint: Endpoint, data: &str) -> Result<(), DeliveryError> {
		self.batch_calls.fetch_add(1, Ordering::SeqCst);
		self.pause().await;

		let payload = wire::decode(data).unwrap();
		let items = payload.as_array().cloned().unwrap_or_default();
		assert!(items.len() <= wire::MAX_BATCH_SIZE, "oversized batch");

		let reply = self.next_reply(&self.batch_replies);
		if reply == Reply::Accept {
			self.batches.lock().unwrap().push((endpoint, items));
		}
		reply.into_result()
	}
}

/// Memory blob whose lock or writes can be made to fail.
#[derive(Clone, Default)]
pub(crate) struct FailingBlobStore {
	pub inner: MemoryBlobStore,
	fail_lock: Arc<AtomicBool>,
	fail_writes: Arc<AtomicBool>,
}

impl FailingBlobStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail_lock(&self, fail: bool) {
		self.fail_lock.store(fail, Ordering::SeqCst);
	}

	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}
}

#[async_trait]
impl BlobStore for FailingBlobStore {
	async fn lock(&self) -> Result<Box<dyn BlobLock>, StorageError> {
		if self.fail_lock.load(Ordering::SeqCst) {
			return Err(StorageError::Lock("lock file unavailable".to_string()));
		}
		Ok(Box::new(FailingBlobLock {
			inner: self.inner.lock().await?,
			fail_writes: Arc::clone(&self.fail_writes),
		}))
	}
}

struct FailingBlobLock {
	inner: Box<dyn BlobLock>,
	fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl BlobLock for FailingBlobLock {
	async fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
		self.inner.read_all().await
	}

	async fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(StorageError::Io(std::io::Error::new(
				std::io::ErrorKind::Other,
				"no space left on device",
			)));
		}
		self.inner.write_all(bytes).await
	}
}
