//! File-backed [`ConfigStorage`] for single-process deployments.

// std
use std::{
	collections::BTreeMap,
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	store::{ConfigStorage, StoreError, StoreFuture},
};

type Entries = HashMap<String, Vec<u8>>;

/// Keeps every entry in memory and rewrites a JSON snapshot on each mutation.
///
/// Values are base64-encoded in the snapshot. A mutation only becomes visible to readers once
/// the snapshot holding it has been renamed into place, so a failed write leaves both the file
/// and the in-memory view unchanged.
#[derive(Clone, Debug)]
pub struct FileStorage {
	path: PathBuf,
	entries: Arc<RwLock<Entries>>,
}
impl FileStorage {
	/// Opens the snapshot at `path`, creating parent directories; a missing or empty file
	/// starts an empty store.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| backend("create", parent, e))?;
		}

		let entries = if path.exists() { load(&path)? } else { Entries::new() };

		Ok(Self { path, entries: Arc::new(RwLock::new(entries)) })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn commit(&self, mutate: impl FnOnce(&mut Entries) -> bool) -> Result<(), StoreError> {
		let mut entries = self.entries.write();
		let mut next = entries.clone();

		if mutate(&mut next) {
			save(&self.path, &next)?;

			*entries = next;
		}

		Ok(())
	}
}
impl ConfigStorage for FileStorage {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
		Box::pin(async move { Ok(self.entries.read().get(key).cloned()) })
	}

	fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.commit(|entries| {
				let previous = entries.insert(key.to_owned(), value.clone());

				previous.as_ref() != Some(&value)
			})
		})
	}

	fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.commit(|entries| entries.remove(key).is_some()) })
	}
}

fn load(path: &Path) -> Result<Entries, StoreError> {
	let bytes = fs::read(path).map_err(|e| backend("read", path, e))?;

	if bytes.is_empty() {
		return Ok(Entries::new());
	}

	let encoded: BTreeMap<String, String> = serde_json::from_slice(&bytes).map_err(|e| {
		StoreError::Serialization { message: format!("Failed to parse {}: {e}", path.display()) }
	})?;

	encoded
		.into_iter()
		.map(|(key, value)| {
			let decoded = STANDARD.decode(value).map_err(|e| StoreError::Serialization {
				message: format!("Entry `{key}` in {} is not valid base64: {e}", path.display()),
			})?;

			Ok((key, decoded))
		})
		.collect()
}

fn save(path: &Path, entries: &Entries) -> Result<(), StoreError> {
	let encoded: BTreeMap<&str, String> =
		entries.iter().map(|(key, value)| (key.as_str(), STANDARD.encode(value))).collect();
	let bytes = serde_json::to_vec_pretty(&encoded).map_err(|e| StoreError::Serialization {
		message: format!("Failed to serialize snapshot: {e}"),
	})?;
	let staging = path.with_extension("tmp");
	let mut file = File::create(&staging).map_err(|e| backend("create", &staging, e))?;

	file.write_all(&bytes).map_err(|e| backend("write", &staging, e))?;
	file.sync_all().map_err(|e| backend("sync", &staging, e))?;
	drop(file);

	fs::rename(&staging, path).map_err(|e| backend("replace", path, e))
}

fn backend(action: &str, path: &Path, e: std::io::Error) -> StoreError {
	StoreError::Backend { message: format!("Failed to {action} {}: {e}", path.display()) }
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use tokio::runtime::Runtime;
	// self
	use super::*;

	fn temp_path(tag: &str) -> PathBuf {
		env::temp_dir().join(format!(
			"iam_secret_broker_{tag}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		))
	}

	#[test]
	fn snapshot_survives_reopen() {
		let path = temp_path("file_storage");
		let storage = FileStorage::open(&path).expect("File storage should open.");
		let rt = Runtime::new().expect("Tokio runtime should build.");

		rt.block_on(storage.put("config/realms/a/connection", b"{\"realm\":\"a\"}".to_vec()))
			.expect("Put should succeed.");
		rt.block_on(storage.put("config/connection", b"{\"realm\":\"m\"}".to_vec()))
			.expect("Put should succeed.");
		rt.block_on(storage.delete("config/connection")).expect("Delete should succeed.");
		drop(storage);

		let reopened = FileStorage::open(&path).expect("File storage should reopen.");

		assert_eq!(
			rt.block_on(reopened.get("config/realms/a/connection")).expect("Get should succeed."),
			Some(b"{\"realm\":\"a\"}".to_vec())
		);
		assert_eq!(
			rt.block_on(reopened.get("config/connection")).expect("Get should succeed."),
			None
		);

		fs::remove_file(reopened.path()).expect("Temporary snapshot should be removable.");
	}

	#[test]
	fn failed_writes_leave_memory_untouched() {
		let dir = temp_path("file_storage_dir");
		let storage =
			FileStorage::open(dir.join("snapshot.json")).expect("File storage should open.");
		let rt = Runtime::new().expect("Tokio runtime should build.");

		fs::remove_dir_all(&dir).expect("Snapshot directory should be removable.");

		assert!(rt.block_on(storage.put("config/connection", b"{}".to_vec())).is_err());
		assert_eq!(
			rt.block_on(storage.get("config/connection")).expect("Get should succeed."),
			None
		);
	}
}
