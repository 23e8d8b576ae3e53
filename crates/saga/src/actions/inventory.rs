use std::sync::Arc;

use async_trait::async_trait;

use super::ResourceLedger;
use crate::saga::{ActionError, BoundParams, ParamKind, ParamSpec, SagaAction};

pub const INVENTORY_TABLE: &str = "inventory";
pub const INVENTORY_NOT_ENOUGH: &str = "INVENTORY_NOT_ENOUGH";

const PARAMS: &[ParamSpec] = &[
	ParamSpec::required("productId", ParamKind::String),
	ParamSpec::required("count", ParamKind::Integer),
];

/// Reduces product stock; compensation puts the stock back.
pub struct InventoryAction {
	ledger: Arc<dyn ResourceLedger>,
}

impl InventoryAction {
	pub fn new(ledger: Arc<dyn ResourceLedger>) -> Self {
		Self { ledger }
	}
}

#[async_trait]
impl SagaAction for InventoryAction {
	fn params(&self) -> &[ParamSpec] {
		PARAMS
	}

	async fn forward(&self, business_key: &str, params: &BoundParams) -> Result<bool, ActionError> {
		super::reduce(
			self.ledger.as_ref(),
			INVENTORY_TABLE,
			params.str("productId")?,
			params.i64("count")?,
			INVENTORY_NOT_ENOUGH,
			business_key,
		)
		.await
	}

	async fn compensate(
		&self,
		business_key: &str,
		params: &BoundParams,
	) -> Result<bool, ActionError> {
		super::restore(
			self.ledger.as_ref(),
			INVENTORY_TABLE,
			params.str("productId")?,
			params.i64("count")?,
			business_key,
		)
		.await
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;
	use crate::actions::MemoryLedger;

	fn params(product: &str, count: i64) -> BoundParams {
		[
			("productId".to_string(), json!(product)),
			("count".to_string(), json!(count)),
		]
		.into_iter()
		.collect()
	}

	#[tokio::test]
	async fn test_reduce_and_compensate() {
		let ledger = Arc::new(MemoryLedger::new());
		ledger.seed(INVENTORY_TABLE, "p_b", 100).await.unwrap();
		let action = InventoryAction::new(ledger.clone());

		assert!(action.forward("bk", &params("p_b", 10)).await.unwrap());
		assert_eq!(ledger.quantity(INVENTORY_TABLE, "p_b").await.unwrap(), Some(90));

		assert!(action.compensate("bk", &params("p_b", 10)).await.unwrap());
		assert_eq!(ledger.quantity(INVENTORY_TABLE, "p_b").await.unwrap(), Some(100));
	}

	#[tokio::test]
	async fn test_reduce_insufficient_stock_leaves_stock_untouched() {
		let ledger = Arc::new(MemoryLedger::new());
		ledger.seed(INVENTORY_TABLE, "p_i", 100).await.unwrap();
		let action = InventoryAction::new(ledger.clone());

		assert_matches!(
			action.forward("bk", &params("p_i", 1000)).await,
			Err(ActionError::Business { code, .. }) if code == INVENTORY_NOT_ENOUGH
		);
		assert_eq!(ledger.quantity(INVENTORY_TABLE, "p_i").await.unwrap(), Some(100));
	}

	#[tokio::test]
	async fn test_non_positive_count_counts_as_one() {
		let ledger = Arc::new(MemoryLedger::new());
		ledger.seed(INVENTORY_TABLE, "p_s", 5).await.unwrap();
		let action = InventoryAction::new(ledger.clone());

		assert!(action.forward("bk", &params("p_s", 0)).await.unwrap());
		assert_eq!(ledger.quantity(INVENTORY_TABLE, "p_s").await.unwrap(), Some(4));
	}
}
