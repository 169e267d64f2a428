//! File-based storage backend.
//!
//! One file per key. Keys are escaped into file names reversibly so prefix
//! scans can recover them from a directory listing. Conditional batches are
//! serialized by an in-process mutex together with an advisory lock on
//! `.lock` in the storage directory, so several processes may share it.
//! A batch stages every write before renaming any of them into place; a
//! failed write leaves the stored keys untouched.

use crate::{BatchOp, Guard, StorageError, StorageInterface};
use async_trait::async_trait;
use booking_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use fs2::FileExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;

fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

/// Fixed-size file header for TTL support.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "BKST"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix millis, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"BKST";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			now_millis().saturating_add(ttl.as_millis() as u64)
		};
		Self { expires_at }
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::VERSION.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unknown file format".into()));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}
		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && now_millis() >= self.expires_at
	}
}

/// Default TTLs per storage namespace, applied when a write carries none.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	/// Reads `ttl_{namespace}` integer seconds from the implementation table.
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();
		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(secs) = table.get(&config_key).and_then(|v| v.as_integer()) {
					ttls.insert(storage_key, Duration::from_secs(secs.max(0) as u64));
				}
			}
		}
		Self { ttls }
	}

	fn ttl_for_key(&self, key: &str) -> Duration {
		key.split(':')
			.next()
			.and_then(|namespace| namespace.parse::<StorageKey>().ok())
			.and_then(|sk| self.ttls.get(&sk).copied())
			.unwrap_or(Duration::ZERO)
	}
}

/// Escapes a key into a file-name-safe string.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is injective so [`decode_key`] can invert it.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for byte in key.bytes() {
		if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
			out.push(byte as char);
		} else {
			out.push_str(&format!("%{:02X}", byte));
		}
	}
	out
}

fn decode_key(name: &str) -> Option<String> {
	let bytes = name.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let hex = name.get(i + 1..i + 3)?;
			out.push(u8::from_str_radix(hex, 16).ok()?);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8(out).ok()
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	/// Serializes writers within this process.
	write_lock: Mutex<()>,
}

impl FileStorage {
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
			write_lock: Mutex::new(()),
		}
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		self.base_path.join(format!("{}.bin", encode_key(key)))
	}

	/// Takes the cross-process advisory lock. Released when the file drops.
	async fn lock_directory(&self) -> Result<std::fs::File, StorageError> {
		fs::create_dir_all(&self.base_path).await.map_err(backend_err)?;
		let lock_path = self.base_path.join(".lock");
		tokio::task::spawn_blocking(move || {
			let file = std::fs::OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(&lock_path)?;
			file.lock_exclusive()?;
			Ok::<_, std::io::Error>(file)
		})
		.await
		.map_err(backend_err)?
		.map_err(backend_err)
	}

	/// Reads the live payload of a file, `None` if missing or expired.
	async fn read_live(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(backend_err(e)),
		};
		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Ok(None);
		}
		Ok(Some(data[FileHeader::SIZE..].to_vec()))
	}

	fn frame(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
		let ttl = ttl.unwrap_or_else(|| self.ttl_config.ttl_for_key(key));
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&FileHeader::new(ttl).serialize());
		file_data.extend_from_slice(value);
		file_data
	}

	async fn write_file(
		&self,
		key: &str,
		value: &[u8],
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);
		fs::create_dir_all(&self.base_path).await.map_err(backend_err)?;

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, self.frame(key, value, ttl))
			.await
			.map_err(backend_err)?;
		fs::rename(&temp_path, &path).await.map_err(backend_err)
	}

	/// Writes every put of a batch to a staging file next to its target.
	/// Nothing is visible to readers until [`Self::commit_staged`].
	async fn stage_batch(
		&self,
		ops: &[BatchOp],
		batch_id: &str,
	) -> Result<Vec<(PathBuf, PathBuf)>, StorageError> {
		fs::create_dir_all(&self.base_path).await.map_err(backend_err)?;
		let mut staged = Vec::new();
		for op in ops {
			let BatchOp::Put { key, value, ttl } = op else {
				continue;
			};
			let path = self.get_file_path(key);
			let staging = path.with_extension(format!("{}.staged", batch_id));
			if let Err(e) = fs::write(&staging, self.frame(key, value, *ttl)).await {
				Self::discard_staged(&staged).await;
				let _ = fs::remove_file(&staging).await;
				return Err(backend_err(e));
			}
			staged.push((staging, path));
		}
		Ok(staged)
	}

	async fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
		for (staging, _) in staged {
			if let Err(e) = fs::remove_file(staging).await {
				if e.kind() != std::io::ErrorKind::NotFound {
					tracing::warn!("Failed to remove staged file {:?}: {}", staging, e);
				}
			}
		}
	}

	async fn remove_file(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_err(e)),
		}
	}

	/// Lists `(key, path)` of every stored file.
	async fn list_files(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_err(e)),
		};

		let mut files = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			let Some(key) = path
				.file_stem()
				.and_then(|stem| stem.to_str())
				.and_then(decode_key)
			else {
				tracing::debug!("Skipping file {:?}: not a storage key", path);
				continue;
			};
			files.push((key, path));
		}
		Ok(files)
	}

	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let _guard = self.write_lock.lock().await;
		let mut removed = 0;
		for (_, path) in self.list_files().await? {
			let header = match fs::read(&path).await {
				Ok(data) => FileHeader::deserialize(&data),
				Err(e) => {
					tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
					continue;
				},
			};
			if header.is_ok_and(|h| h.is_expired()) {
				match fs::remove_file(&path).await {
					Ok(_) => removed += 1,
					Err(e) => tracing::warn!("Failed to remove expired file {:?}: {}", path, e),
				}
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		Self::read_live(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write_file(key, &value, ttl).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.remove_file(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(Self::read_live(&self.get_file_path(key)).await?.is_some())
	}

	async fn apply_if(&self, guard: Guard, ops: Vec<BatchOp>) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		let lock_file = self.lock_directory().await?;

		let current = Self::read_live(&self.get_file_path(&guard.key)).await?;
		if current.as_deref() != guard.expected.as_deref() {
			return Ok(false);
		}

		// The guard key is committed last so a crash mid-batch never exposes
		// a new guard value without the writes that accompany it.
		let (guard_ops, other_ops): (Vec<_>, Vec<_>) =
			ops.into_iter().partition(|op| op.key() == guard.key);
		let ops: Vec<BatchOp> = other_ops.into_iter().chain(guard_ops).collect();

		let batch_id = uuid::Uuid::new_v4().simple().to_string();
		let staged = self.stage_batch(&ops, &batch_id).await?;

		let mut renames = staged.iter();
		for op in &ops {
			let result = match op {
				BatchOp::Put { .. } => match renames.next() {
					Some((staging, path)) => fs::rename(staging, path).await.map_err(backend_err),
					None => Err(StorageError::Backend("Staged write missing".into())),
				},
				BatchOp::Delete { key } => self.remove_file(key).await,
			};
			if let Err(e) = result {
				Self::discard_staged(&staged).await;
				return Err(e);
			}
		}

		FileExt::unlock(&lock_file).map_err(backend_err)?;
		Ok(true)
	}

	async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
		let mut results = Vec::new();
		for (key, path) in self.list_files().await? {
			if !key.starts_with(prefix) {
				continue;
			}
			if let Some(value) = Self::read_live(&path).await? {
				results.push((key, value));
			}
		}
		Ok(results)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		for storage_key in StorageKey::all() {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}
		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
/// - `ttl_{namespace}`: default TTL in seconds for a namespace, e.g. `ttl_order_lists`
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage")
		.to_string();

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
