//! Reference business actions and the resource ledger they mutate.
//!
//! Both actions follow the same contract: `Reduce` atomically decrements a
//! resource only when enough is available, `CompensateReduce` adds the same
//! quantity back.

mod balance;
mod inventory;
mod ledger;

pub use balance::{BALANCE_NOT_ENOUGH, BALANCE_TABLE, BalanceAction};
pub use inventory::{INVENTORY_NOT_ENOUGH, INVENTORY_TABLE, InventoryAction};
pub use ledger::{LedgerError, MemoryLedger, ResourceLedger};

use tracing::info;

use crate::saga::ActionError;

/// Quantities at or below zero are treated as one unit.
fn normalize_quantity(quantity: i64) -> i64 {
	if quantity <= 0 { 1 } else { quantity }
}

async fn reduce(
	ledger: &dyn ResourceLedger,
	table: &str,
	resource_id: &str,
	quantity: i64,
	not_enough: &str,
	business_key: &str,
) -> Result<bool, ActionError> {
	let quantity = normalize_quantity(quantity);
	let reduced = ledger
		.try_decrement(table, resource_id, quantity)
		.await
		.map_err(|e| ActionError::Ledger(e.to_string()))?;
	if !reduced {
		return Err(ActionError::business(
			not_enough,
			format!("{table} '{resource_id}' has less than {quantity} available"),
		));
	}
	info!(business_key, table, resource_id, quantity, "reduced resource");
	Ok(true)
}

async fn restore(
	ledger: &dyn ResourceLedger,
	table: &str,
	resource_id: &str,
	quantity: i64,
	business_key: &str,
) -> Result<bool, ActionError> {
	let quantity = normalize_quantity(quantity);
	let restored = ledger
		.increment(table, resource_id, quantity)
		.await
		.map_err(|e| ActionError::Ledger(e.to_string()))?;
	if restored {
		info!(business_key, table, resource_id, quantity, "restored resource");
	}
	Ok(restored)
}
