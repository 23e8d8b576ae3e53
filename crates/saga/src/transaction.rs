//! Global transaction collaborator.
//!
//! The coordination protocol itself lives in an external transaction manager.
//! The engine only begins a named global transaction per run, uses its xid as
//! the run identifier, and ends it with the run's outcome. While a step runs,
//! the active xid is readable through [`current_xid`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
	#[error("transaction manager unavailable: {0}")]
	Unavailable(String),

	#[error("unknown global transaction {0}")]
	UnknownTransaction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
	Commit,
	Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalTransaction {
	xid: String,
	name: String,
	timeout: Option<Duration>,
	began_at: DateTime<Utc>,
}

impl GlobalTransaction {
	pub fn new(xid: impl Into<String>, name: impl Into<String>, timeout: Option<Duration>) -> Self {
		Self {
			xid: xid.into(),
			name: name.into(),
			timeout,
			began_at: Utc::now(),
		}
	}

	pub fn xid(&self) -> &str {
		&self.xid
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.timeout
	}

	pub fn began_at(&self) -> DateTime<Utc> {
		self.began_at
	}
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
	async fn begin(
		&self,
		name: &str,
		timeout: Option<Duration>,
	) -> Result<GlobalTransaction, TransactionError>;

	async fn end(
		&self,
		tx: &GlobalTransaction,
		outcome: TransactionOutcome,
	) -> Result<(), TransactionError>;
}

/// In-process transaction manager handing out UUID xids.
#[derive(Debug, Default)]
pub struct LocalTransactionManager {
	active: Mutex<HashMap<String, GlobalTransaction>>,
}

impl LocalTransactionManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_active(&self, xid: &str) -> bool {
		self.active.lock().contains_key(xid)
	}

	pub fn active_count(&self) -> usize {
		self.active.lock().len()
	}
}

#[async_trait]
impl TransactionManager for LocalTransactionManager {
	async fn begin(
		&self,
		name: &str,
		timeout: Option<Duration>,
	) -> Result<GlobalTransaction, TransactionError> {
		let tx = GlobalTransaction::new(uuid::Uuid::new_v4().to_string(), name, timeout);
		self.active.lock().insert(tx.xid.clone(), tx.clone());
		debug!(xid = %tx.xid, name, "began global transaction");
		Ok(tx)
	}

	async fn end(
		&self,
		tx: &GlobalTransaction,
		outcome: TransactionOutcome,
	) -> Result<(), TransactionError> {
		if self.active.lock().remove(&tx.xid).is_none() {
			return Err(TransactionError::UnknownTransaction(tx.xid.clone()));
		}
		debug!(xid = %tx.xid, ?outcome, "ended global transaction");
		Ok(())
	}
}

tokio::task_local! {
	static CURRENT_XID: String;
}

/// Xid of the global transaction the current task runs under, if any.
pub fn current_xid() -> Option<String> {
	CURRENT_XID.try_with(Clone::clone).ok()
}

/// Run `fut` with `xid` as the current global transaction.
pub async fn scope<F: Future>(xid: String, fut: F) -> F::Output {
	CURRENT_XID.scope(xid, fut).await
}

/// Dial the first reachable-looking coordinator address.
///
/// Entries may hold several comma separated addresses; only the first of an
/// entry is tried. Returns the address that accepted the connection.
pub async fn check_connectivity(
	grouplist: &[String],
	connect_timeout: Duration,
) -> Result<String, TransactionError> {
	for entry in grouplist {
		let target = entry.split(',').next().unwrap_or_default().trim();
		if target.is_empty() {
			continue;
		}
		return match tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(target)).await
		{
			Ok(Ok(_stream)) => {
				info!(address = target, "transaction coordinator reachable");
				Ok(target.to_string())
			},
			Ok(Err(e)) => {
				warn!(address = target, error = %e, "transaction coordinator unreachable");
				Err(TransactionError::Unavailable(format!("dial {target} failed: {e}")))
			},
			Err(_) => Err(TransactionError::Unavailable(format!(
				"dial {target} timed out after {connect_timeout:?}"
			))),
		};
	}
	Err(TransactionError::Unavailable(
		"no coordinator address configured".to_string(),
	))
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[tokio::test]
	async fn test_local_manager_begin_end() {
		let tm = LocalTransactionManager::new();
		let tx = tm.begin("saga", Some(Duration::from_secs(5))).await.unwrap();
		assert!(tm.is_active(tx.xid()));
		assert_eq!(tx.name(), "saga");

		tm.end(&tx, TransactionOutcome::Commit).await.unwrap();
		assert!(!tm.is_active(tx.xid()));
		assert_matches!(
			tm.end(&tx, TransactionOutcome::Rollback).await,
			Err(TransactionError::UnknownTransaction(_))
		);
	}

	#[tokio::test]
	async fn test_current_xid_scope() {
		assert_eq!(current_xid(), None);
		let seen = scope("xid-42".to_string(), async { current_xid() }).await;
		assert_eq!(seen.as_deref(), Some("xid-42"));
	}

	#[tokio::test]
	async fn test_check_connectivity() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();

		let reached = check_connectivity(
			&[format!("{addr}, 127.0.0.1:1")],
			Duration::from_secs(1),
		)
		.await
		.unwrap();
		assert_eq!(reached, addr);

		assert_matches!(
			check_connectivity(&[], Duration::from_secs(1)).await,
			Err(TransactionError::Unavailable(_))
		);
	}
}
