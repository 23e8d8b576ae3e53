use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
	#[error("quantity must be positive, got {0}")]
	InvalidQuantity(i64),
	#[error("ledger storage error: {0}")]
	Storage(String),
}

/// Mutable resource quantities (stock by product, balance by user), grouped in
/// named tables.
///
/// `try_decrement` must be a single atomic compare-and-decrement so
/// concurrent reductions of one resource cannot lose updates.
#[async_trait]
pub trait ResourceLedger: Send + Sync {
	/// Insert or overwrite a resource quantity.
	async fn seed(&self, table: &str, id: &str, quantity: i64) -> Result<(), LedgerError>;

	async fn quantity(&self, table: &str, id: &str) -> Result<Option<i64>, LedgerError>;

	/// Subtract `quantity` if at least that much is available. Returns `false`
	/// without changing anything when the resource is missing or short.
	async fn try_decrement(&self, table: &str, id: &str, quantity: i64)
	-> Result<bool, LedgerError>;

	/// Add `quantity` back. Returns `false` when the resource doesn't exist.
	async fn increment(&self, table: &str, id: &str, quantity: i64) -> Result<bool, LedgerError>;
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
	rows: Mutex<HashMap<(String, String), i64>>,
}

impl MemoryLedger {
	pub fn new() -> Self {
		Self::default()
	}
}

fn check_quantity(quantity: i64) -> Result<(), LedgerError> {
	if quantity <= 0 {
		Err(LedgerError::InvalidQuantity(quantity))
	} else {
		Ok(())
	}
}

#[async_trait]
impl ResourceLedger for MemoryLedger {
	async fn seed(&self, table: &str, id: &str, quantity: i64) -> Result<(), LedgerError> {
		self
			.rows
			.lock()
			.insert((table.to_string(), id.to_string()), quantity);
		Ok(())
	}

	async fn quantity(&self, table: &str, id: &str) -> Result<Option<i64>, LedgerError> {
		Ok(
			self
				.rows
				.lock()
				.get(&(table.to_string(), id.to_string()))
				.copied(),
		)
	}

	async fn try_decrement(
		&self,
		table: &str,
		id: &str,
		quantity: i64,
	) -> Result<bool, LedgerError> {
		check_quantity(quantity)?;
		let mut rows = self.rows.lock();
		match rows.get_mut(&(table.to_string(), id.to_string())) {
			Some(available) if *available >= quantity => {
				*available -= quantity;
				Ok(true)
			},
			_ => Ok(false),
		}
	}

	async fn increment(&self, table: &str, id: &str, quantity: i64) -> Result<bool, LedgerError> {
		check_quantity(quantity)?;
		let mut rows = self.rows.lock();
		match rows.get_mut(&(table.to_string(), id.to_string())) {
			Some(available) => {
				*available += quantity;
				Ok(true)
			},
			None => Ok(false),
		}
	}
}
