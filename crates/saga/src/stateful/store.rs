use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("key not found: {0}")]
	NotFound(String),
	#[error("serialization error: {0}")]
	Serialization(String),
	#[error("storage error: {0}")]
	Storage(String),
	#[error("invalid key: {0}")]
	InvalidKey(String),
	#[error("run {0} has already finished")]
	RunFinished(String),
}

impl From<std::io::Error> for StoreError {
	fn from(e: std::io::Error) -> Self {
		StoreError::Storage(e.to_string())
	}
}

/// Async key/value storage for saga documents.
///
/// Writes must be visible to any reader of the same key once the returned
/// future resolves.
#[async_trait]
pub trait StateStore: Send + Sync {
	/// Get a value by key, `Ok(None)` if the key doesn't exist.
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

	/// Set a value, replacing any previous value.
	async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

	/// Delete a key.
	///
	/// Returns `Ok(())` regardless of whether the key existed.
	async fn delete(&self, key: &str) -> Result<(), StoreError>;

	/// List all keys starting with `prefix`, sorted.
	async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

	/// Check if a key exists.
	async fn exists(&self, key: &str) -> Result<bool, StoreError> {
		Ok(self.get(key).await?.is_some())
	}
}

/// JSON documents on top of any [`StateStore`].
#[async_trait]
pub trait StateStoreExt: StateStore {
	async fn get_json<T: serde::de::DeserializeOwned + Send>(
		&self,
		key: &str,
	) -> Result<Option<T>, StoreError> {
		let Some(bytes) = self.get(key).await? else {
			return Ok(None);
		};
		serde_json::from_slice(&bytes)
			.map(Some)
			.map_err(|e| StoreError::Serialization(format!("{key}: {e}")))
	}

	/// Writes pretty-printed JSON.
	async fn set_json<T: serde::Serialize + Send + Sync>(
		&self,
		key: &str,
		value: &T,
	) -> Result<(), StoreError> {
		let bytes = serde_json::to_vec_pretty(value)
			.map_err(|e| StoreError::Serialization(format!("{key}: {e}")))?;
		self.set(key, bytes).await
	}
}

impl<T: StateStore + ?Sized> StateStoreExt for T {}
