// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Locked byte storage underneath [`crate::LocalStore`].
//!
//! A [`BlobStore`] hands out an exclusive [`BlobLock`]; the lock is held for
//! the whole read-modify-write of a store transaction and released on drop.
//! [`FileBlobStore`] uses an advisory lock on a sibling `.lock` file, so the
//! exclusion holds across every process sharing the same path. Waiting for
//! that lock is bounded by [`DEFAULT_LOCK_TIMEOUT`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;

/// Source of exclusive access to the persisted pending-elements blob.
#[async_trait]
pub trait BlobStore: Send + Sync {
	/// Waits until no other holder (task or process) has the lock.
	async fn lock(&self) -> Result<Box<dyn BlobLock>, StorageError>;
}

/// Exclusive access to the blob. Released when dropped.
#[async_trait]
pub trait BlobLock: Send {
	/// Returns `None` when nothing has been written yet.
	async fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError>;

	/// Replaces the blob. Readers never observe a partial write.
	async fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError>;
}

/// How long [`FileBlobStore::lock`] waits for another holder before failing.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Blob stored in a single file, guarded by `<file>.lock`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
	path: PathBuf,
	lock_timeout: Duration,
}

impl FileBlobStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock_timeout: DEFAULT_LOCK_TIMEOUT,
		}
	}

	pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
		self.lock_timeout = timeout;
		self
	}

	/// `$XDG_STATE_HOME/tally/pending.json`, falling back to the local data
	/// directory on platforms without a state directory.
	pub fn from_xdg() -> Result<Self, StorageError> {
		let base = dirs::state_dir()
			.or_else(dirs::data_local_dir)
			.ok_or(StorageError::NoStateDir)?;
		Ok(Self::new(base.join("tally").join("pending.json")))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn lock_path(&self) -> PathBuf {
		sibling(&self.path, ".lock")
	}
}

#[async_trait]
impl BlobStore for FileBlobStore {
	async fn lock(&self) -> Result<Box<dyn BlobLock>, StorageError> {
		if let Some(parent) = self.path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let lock_path = self.lock_path();
		let timeout = self.lock_timeout;
		let guard = tokio::task::spawn_blocking(move || acquire_file_lock(&lock_path, timeout))
			.await
			.map_err(|e| StorageError::Lock(e.to_string()))??;

		Ok(Box::new(FileBlobLock {
			path: self.path.clone(),
			_guard: guard,
		}))
	}
}

struct FileBlobLock {
	path: PathBuf,
	_guard: os_lock::FileLock,
}

#[async_trait]
impl BlobLock for FileBlobLock {
	async fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
		match tokio::fs::read(&self.path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
		let temp_path = sibling(&self.path, ".tmp");

		let mut file = tokio::fs::File::create(&temp_path).await?;
		file.write_all(bytes).await?;
		file.sync_all().await?;
		drop(file);

		if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
			let _ = tokio::fs::remove_file(&temp_path).await;
			return Err(e.into());
		}
		Ok(())
	}
}

/// Polls for the lock until `timeout` has passed.
fn acquire_file_lock(path: &Path, timeout: Duration) -> Result<os_lock::FileLock, StorageError> {
	let deadline = Instant::now() + timeout;
	loop {
		if let Some(lock) = os_lock::FileLock::try_acquire(path)? {
			return Ok(lock);
		}
		if Instant::now() >= deadline {
			return Err(StorageError::Lock(format!(
				"timed out after {timeout:?} waiting for {}",
				path.display()
			)));
		}
		std::thread::sleep(LOCK_POLL_INTERVAL);
	}
}

/// `pending.json` + `.lock` -> `pending.json.lock`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
	let mut name: OsString = path
		.file_name()
		.map(|n| n.to_os_string())
		.unwrap_or_default();
	name.push(suffix);
	path.with_file_name(name)
}

#[cfg(unix)]
mod os_lock {
	use std::fs::{File, OpenOptions};
	use std::io;
	use std::os::unix::io::AsRawFd;
	use std::path::Path;

	use crate::error::StorageError;

	/// `flock(2)` on an open descriptor. The kernel drops it if the process dies.
	pub(super) struct FileLock {
		file: File,
	}

	impl FileLock {
		/// `Ok(None)` while another descriptor holds the lock.
		pub(super) fn try_acquire(path: &Path) -> Result<Option<Self>, StorageError> {
			let file = OpenOptions::new()
				.create(true)
				.read(true)
				.write(true)
				.truncate(false)
				.open(path)?;

			loop {
				// SAFETY: the descriptor stays open for the lifetime of `file`.
				let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
				if ret == 0 {
					return Ok(Some(Self { file }));
				}
				let err = io::Error::last_os_error();
				match err.kind() {
					io::ErrorKind::Interrupted => continue,
					io::ErrorKind::WouldBlock => return Ok(None),
					_ => return Err(err.into()),
				}
			}
		}
	}

	impl Drop for FileLock {
		fn drop(&mut self) {
			// SAFETY: see `try_acquire`.
			unsafe {
				libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
			}
		}
	}
}

#[cfg(not(unix))]
mod os_lock {
	use std::fs::{File, OpenOptions};
	use std::io;
	use std::path::{Path, PathBuf};
	use std::time::Duration;

	use crate::error::StorageError;

	/// A lock file older than this belongs to a holder that died.
	const STALE_AFTER: Duration = Duration::from_secs(30);

	/// Exclusive-create lock file, removed on drop.
	pub(super) struct FileLock {
		path: PathBuf,
		file: Option<File>,
	}

	impl FileLock {
		/// `Ok(None)` while the lock file exists and is fresh. A stale lock
		/// file is removed so the next attempt can take it.
		pub(super) fn try_acquire(path: &Path) -> Result<Option<Self>, StorageError> {
			match OpenOptions::new().write(true).create_new(true).open(path) {
				Ok(file) => Ok(Some(Self {
					path: path.to_path_buf(),
					file: Some(file),
				})),
				Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
					if is_stale(path) {
						tracing::warn!(path = %path.display(), "Removing stale store lock");
						let _ = std::fs::remove_file(path);
					}
					Ok(None)
				}
				Err(e) => Err(e.into()),
			}
		}
	}

	fn is_stale(path: &Path) -> bool {
		std::fs::metadata(path)
			.and_then(|meta| meta.modified())
			.ok()
			.and_then(|modified| modified.elapsed().ok())
			.is_some_and(|age| age > STALE_AFTER)
	}

	impl Drop for FileLock {
		fn drop(&mut self) {
			drop(self.file.take());
			let _ = std::fs::remove_file(&self.path);
		}
	}
}

/// In-process blob, for tests and for callers that opt out of persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
	blob: Arc<Mutex<Option<Vec<u8>>>>,
	writes: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
		Self {
			blob: Arc::new(Mutex::new(Some(bytes.into()))),
			writes: Arc::new(AtomicUsize::new(0)),
		}
	}

	pub async fn contents(&self) -> Option<Vec<u8>> {
		self.blob.lock().await.clone()
	}

	/// Number of completed writes since construction.
	pub fn write_count(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
	async fn lock(&self) -> Result<Box<dyn BlobLock>, StorageError> {
		let guard = Arc::clone(&self.blob).lock_owned().await;
		Ok(Box::new(MemoryBlobLock {
			guard,
			writes: Arc::clone(&self.writes),
		}))
	}
}

struct MemoryBlobLock {
	guard: OwnedMutexGuard<Option<Vec<u8>>>,
	writes: Arc<AtomicUsize>,
}

#[async_trait]
impl BlobLock for MemoryBlobLock {
	async fn read_all(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
		Ok(self.guard.clone())
	}

	async fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
		*self.guard = Some(bytes.to_vec());
		self.writes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}
