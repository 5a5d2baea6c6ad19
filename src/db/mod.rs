use async_trait::async_trait;
use thiserror::Error;

use crate::error::LedgerError;

use self::account::{Account, AccountStore};
use self::tx::{NewTransaction, Transaction, TransactionStore};
use self::user::UserStore;

pub mod account;
pub mod auth;
#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod tx;
pub mod user;
pub mod utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Validation run against the locked `from`/`to` rows before anything is written.
pub type TransferCheck<'a> =
    dyn Fn(Option<&Account>, Option<&Account>) -> Result<(), LedgerError> + Send + Sync + 'a;

/// Everything the ledger engine needs from persistence.
///
/// `execute_transfer` is the only path that changes balances. Implementations
/// must lock both account rows (in IBAN order), run `check` on the locked
/// state, then persist the transaction record and both balances as one unit.
/// If `check` fails, or anything fails afterwards, nothing is written.
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionStore + UserStore {
    async fn execute_transfer(
        &self,
        draft: NewTransaction,
        check: &TransferCheck<'_>,
    ) -> Result<Transaction, LedgerError>;
}
