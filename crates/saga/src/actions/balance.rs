use std::sync::Arc;

use async_trait::async_trait;

use super::ResourceLedger;
use crate::saga::{ActionError, BoundParams, ParamKind, ParamSpec, SagaAction};

pub const BALANCE_TABLE: &str = "balance";
pub const BALANCE_NOT_ENOUGH: &str = "BALANCE_NOT_ENOUGH";

const PARAMS: &[ParamSpec] = &[
	ParamSpec::required("userId", ParamKind::String),
	ParamSpec::required("amount", ParamKind::Integer),
];

/// Debits an account balance; compensation credits it back.
pub struct BalanceAction {
	ledger: Arc<dyn ResourceLedger>,
}

impl BalanceAction {
	pub fn new(ledger: Arc<dyn ResourceLedger>) -> Self {
		Self { ledger }
	}
}

#[async_trait]
impl SagaAction for BalanceAction {
	fn params(&self) -> &[ParamSpec] {
		PARAMS
	}

	async fn forward(&self, business_key: &str, params: &BoundParams) -> Result<bool, ActionError> {
		super::reduce(
			self.ledger.as_ref(),
			BALANCE_TABLE,
			params.str("userId")?,
			params.i64("amount")?,
			BALANCE_NOT_ENOUGH,
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
			BALANCE_TABLE,
			params.str("userId")?,
			params.i64("amount")?,
			business_key,
		)
		.await
	}
}
