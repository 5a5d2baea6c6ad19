use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ledger::reference;

use super::utils::{Page, Pagination};
use super::StoreError;

pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Transfer,
    Deposit,
    Withdraw,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "TRANSFER",
            Self::Deposit => "DEPOSIT",
            Self::Withdraw => "WITHDRAW",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRANSFER" => Ok(Self::Transfer),
            "DEPOSIT" => Ok(Self::Deposit),
            "WITHDRAW" => Ok(Self::Withdraw),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// Immutable ledger entry. Accounts are recorded by IBAN, not by reference,
/// so the entry stays readable after either account is deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub from_account: String,
    pub to_account: String,
    pub transfer_amount: Decimal,
    pub description: Option<String>,
    pub reference: String,
    pub timestamp: DateTime<Utc>,
    pub transaction_type: TransactionType,
}

impl Transaction {
    pub fn involves(&self, iban: &str) -> bool {
        self.from_account == iban || self.to_account == iban
    }
}

/// A transaction that has not been assigned an id, timestamp or reference yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub from_account: String,
    pub to_account: String,
    pub transfer_amount: Decimal,
    pub description: Option<String>,
    pub transaction_type: TransactionType,
}

impl NewTransaction {
    /// Stamp the draft. The reference is generated here and nowhere else.
    pub fn into_transaction(self, id: TransactionId, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            reference: reference::generate(Some(id), timestamp),
            from_account: self.from_account,
            to_account: self.to_account,
            transfer_amount: self.transfer_amount,
            description: self.description,
            timestamp,
            transaction_type: self.transaction_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountOperator {
    Lt,
    Gt,
    Eq,
}

impl AmountOperator {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Eq => "=",
        }
    }
}

impl FromStr for AmountOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lt" => Ok(Self::Lt),
            "gt" => Ok(Self::Gt),
            "eq" => Ok(Self::Eq),
            other => Err(ValidationError::InvalidSearchFilter(format!(
                "unknown amount operator: {other}"
            ))),
        }
    }
}

/// Compares the absolute transfer amount against an absolute threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountFilter {
    pub operator: AmountOperator,
    pub amount: Decimal,
}

impl AmountFilter {
    pub fn matches(&self, amount: Decimal) -> bool {
        let (value, threshold) = (amount.abs(), self.amount.abs());
        match self.operator {
            AmountOperator::Lt => value < threshold,
            AmountOperator::Gt => value > threshold,
            AmountOperator::Eq => value == threshold,
        }
    }
}

/// Conjunctive search over the ledger.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub query: String,
    pub transaction_type: Option<TransactionType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub amount: Option<AmountFilter>,
    pub pagination: Pagination,
}

impl TransactionFilter {
    pub fn needle(&self) -> String {
        self.query.trim().to_lowercase()
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        let needle = self.needle();
        if !needle.is_empty() {
            let hit = tx.from_account.to_lowercase().contains(&needle)
                || tx.to_account.to_lowercase().contains(&needle)
                || tx.reference.to_lowercase().contains(&needle)
                || tx
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
                || tx.id.to_string().contains(&needle);
            if !hit {
                return false;
            }
        }
        if self.transaction_type.is_some_and(|t| t != tx.transaction_type) {
            return false;
        }
        if self.start.is_some_and(|start| tx.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| tx.timestamp > end) {
            return false;
        }
        self.amount.map_or(true, |f| f.matches(tx.transfer_amount))
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Records an entry without touching any balance.
    async fn save_transaction(&self, draft: NewTransaction) -> Result<Transaction, StoreError>;

    async fn save_transactions(
        &self,
        drafts: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn find_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Every entry where the IBAN is the sender or the receiver.
    async fn find_by_participant(&self, iban: &str) -> Result<Vec<Transaction>, StoreError>;

    async fn find_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, StoreError>;

    /// Newest first, then paginated.
    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>, StoreError>;
}
