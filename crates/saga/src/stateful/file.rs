//! Directory-backed implementation of StateStore.
//!
//! Each key maps to one JSON file below the root directory: `machine/<xid>`
//! is stored at `<root>/machine/<xid>.json`. This lets a separate process (the
//! e2e checker) read the records a run produced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::store::{StateStore, StoreError};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileStore {
	root: PathBuf,
}

impl FileStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
		let mut path = self.dir_for(key)?;
		let file_name = path
			.file_name()
			.map(|name| format!("{}.{EXTENSION}", name.to_string_lossy()))
			.ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
		path.set_file_name(file_name);
		Ok(path)
	}

	fn dir_for(&self, key: &str) -> Result<PathBuf, StoreError> {
		validate_key(key)?;
		let mut path = self.root.clone();
		for segment in key.split('/') {
			path.push(segment);
		}
		Ok(path)
	}
}

fn validate_key(key: &str) -> Result<(), StoreError> {
	let valid = !key.is_empty()
		&& key.split('/').all(|segment| {
			!segment.is_empty()
				&& segment != "."
				&& segment != ".."
				&& segment
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
		});
	if valid {
		Ok(())
	} else {
		Err(StoreError::InvalidKey(key.to_string()))
	}
}

#[async_trait]
impl StateStore for FileStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
		let path = self.path_for(key)?;
		match fs_err::tokio::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
		let path = self.path_for(key)?;
		if let Some(parent) = path.parent() {
			fs_err::tokio::create_dir_all(parent).await?;
		}
		// Write then rename so readers never observe a partial document.
		let tmp = path.with_extension("json.tmp");
		fs_err::tokio::write(&tmp, value).await?;
		fs_err::tokio::rename(&tmp, &path).await?;
		debug!(path = %path.display(), "stored document");
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		let path = self.path_for(key)?;
		match fs_err::tokio::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		let (dir, name_prefix) = match prefix.rsplit_once('/') {
			Some((dir, rest)) => (Some(dir), rest),
			None => (None, prefix),
		};
		let dir_path = match dir {
			Some(dir) => self.dir_for(dir)?,
			None => self.root.clone(),
		};

		let mut entries = match tokio::fs::read_dir(&dir_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			if !stem.starts_with(name_prefix) {
				continue;
			}
			keys.push(match dir {
				Some(dir) => format!("{dir}/{stem}"),
				None => stem.to_string(),
			});
		}
		keys.sort();
		Ok(keys)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stateful::StateStoreExt;

	#[tokio::test]
	async fn test_file_store_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path());

		assert!(store.get("machine/abc").await.unwrap().is_none());
		store
			.set_json("machine/abc", &serde_json::json!({"status": "SU"}))
			.await
			.unwrap();

		let value: serde_json::Value = store.get_json("machine/abc").await.unwrap().unwrap();
		assert_eq!(value["status"], "SU");
		assert!(dir.path().join("machine").join("abc.json").exists());

		store.delete("machine/abc").await.unwrap();
		store.delete("machine/abc").await.unwrap();
		assert!(!store.exists("machine/abc").await.unwrap());
	}

	#[tokio::test]
	async fn test_file_store_keys() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path());
		store.set("states/run-2", b"[]".to_vec()).await.unwrap();
		store.set("states/run-1", b"[]".to_vec()).await.unwrap();
		store.set("machine/run-1", b"{}".to_vec()).await.unwrap();

		assert_eq!(
			store.keys("states/").await.unwrap(),
			vec!["states/run-1".to_string(), "states/run-2".to_string()]
		);
		assert!(store.keys("missing/").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_file_store_rejects_traversal() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path());

		let err = store.set("../escape", vec![]).await.unwrap_err();
		assert!(matches!(err, StoreError::InvalidKey(_)));
		assert!(store.get("a//b").await.is_err());
	}
}
