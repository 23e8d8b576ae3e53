// Fixed inputs for the inventory/balance scenarios

use std::sync::Arc;

use saga_engine::actions::{
	BALANCE_TABLE, BalanceAction, INVENTORY_TABLE, InventoryAction, LedgerError, ResourceLedger,
};
use saga_engine::saga::{ActionRegistry, RunParams};
use saga_engine::validation::Scenario;

pub const DEFINITION_NAME: &str = "ReduceInventoryAndBalance";
pub const INVENTORY_ACTION: &str = "inventoryAction";
pub const BALANCE_ACTION: &str = "balanceAction";

/// Starting stock for every product.
const STOCK: i64 = 100;

const BALANCES: [(&str, i64); 3] = [("u_s", 1000), ("u_b", 50), ("u_i", 1000)];

struct Order {
	business_key: &'static str,
	product_id: &'static str,
	count: i64,
	user_id: &'static str,
	amount: i64,
}

fn order(scenario: Scenario) -> Order {
	match scenario {
		Scenario::Success => Order {
			business_key: "bk_success",
			product_id: "p_s",
			count: 1,
			user_id: "u_s",
			amount: 1,
		},
		// u_b only holds 50
		Scenario::CompensateBalance => Order {
			business_key: "bk_comp_bal",
			product_id: "p_b",
			count: 10,
			user_id: "u_b",
			amount: 100,
		},
		Scenario::CompensateInventory => Order {
			business_key: "bk_comp_inv",
			product_id: "p_i",
			count: 1000,
			user_id: "u_i",
			amount: 1,
		},
	}
}

pub fn params(scenario: Scenario) -> RunParams {
	let o = order(scenario);
	RunParams::new()
		.with("businessKey", o.business_key)
		.with("productId", o.product_id)
		.with("count", o.count)
		.with("userId", o.user_id)
		.with("amount", o.amount)
}

pub async fn seed(ledger: &dyn ResourceLedger) -> Result<(), LedgerError> {
	for scenario in Scenario::ALL {
		ledger
			.seed(INVENTORY_TABLE, order(scenario).product_id, STOCK)
			.await?;
	}
	for (user, amount) in BALANCES {
		ledger.seed(BALANCE_TABLE, user, amount).await?;
	}
	Ok(())
}

pub fn register_actions(registry: &mut ActionRegistry, ledger: Arc<dyn ResourceLedger>) {
	registry.register(INVENTORY_ACTION, InventoryAction::new(ledger.clone()));
	registry.register(BALANCE_ACTION, BalanceAction::new(ledger));
}

#[cfg(test)]
mod tests {
	use saga_engine::actions::MemoryLedger;

	use super::*;

	#[tokio::test]
	async fn seeded_balance_cannot_cover_compensate_balance_order() {
		let ledger = MemoryLedger::new();
		seed(&ledger).await.unwrap();
		let p = params(Scenario::CompensateBalance);
		let amount = p.get("amount").and_then(serde_json::Value::as_i64).unwrap();
		let held = ledger.quantity(BALANCE_TABLE, "u_b").await.unwrap().unwrap();
		assert!(amount > held);

		let p = params(Scenario::CompensateInventory);
		let count = p.get("count").and_then(serde_json::Value::as_i64).unwrap();
		assert!(count > STOCK);
	}
}
