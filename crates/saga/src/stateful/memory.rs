//! In-memory implementation of StateStore.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::store::{StateStore, StoreError};

/// In-memory implementation of StateStore.
///
/// Suitable for tests and for runs that are validated in the same process.
#[derive(Default)]
pub struct MemoryStore {
	data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.data.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.lock().is_empty()
	}
}

#[async_trait]
impl StateStore for MemoryStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
		Ok(self.data.lock().get(key).cloned())
	}

	async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
		self.data.lock().insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		self.data.lock().remove(key);
		Ok(())
	}

	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
		let data = self.data.lock();
		Ok(
			data
				.range(prefix.to_string()..)
				.take_while(|(k, _)| k.starts_with(prefix))
				.map(|(k, _)| k.clone())
				.collect(),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_memory_store_basic() {
		let store = MemoryStore::new();

		assert!(store.get("key1").await.unwrap().is_none());

		store.set("key1", b"value1".to_vec()).await.unwrap();
		assert_eq!(store.get("key1").await.unwrap(), Some(b"value1".to_vec()));
		assert!(store.exists("key1").await.unwrap());

		store.delete("key1").await.unwrap();
		assert!(store.get("key1").await.unwrap().is_none());
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn test_memory_store_overwrite() {
		let store = MemoryStore::new();

		store.set("key1", b"value1".to_vec()).await.unwrap();
		store.set("key1", b"value2".to_vec()).await.unwrap();

		assert_eq!(store.get("key1").await.unwrap(), Some(b"value2".to_vec()));
		assert_eq!(store.len(), 1);
	}

	#[tokio::test]
	async fn test_memory_store_keys_by_prefix() {
		let store = MemoryStore::new();
		store.set("machine/b", vec![]).await.unwrap();
		store.set("machine/a", vec![]).await.unwrap();
		store.set("states/a", vec![]).await.unwrap();

		let keys = store.keys("machine/").await.unwrap();
		assert_eq!(keys, vec!["machine/a".to_string(), "machine/b".to_string()]);
	}
}
