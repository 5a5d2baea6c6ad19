use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::tx::{NewTransaction, Transaction, TransactionFilter, TransactionId, TransactionType};
use crate::db::utils::Page;
use crate::db::{LedgerStore, TransferCheck};
use crate::error::{LedgerError, ValidationError};

use self::actor::Actor;

pub mod accounts;
pub mod actor;
pub mod iban;
pub mod reference;
pub mod validator;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_account: Option<String>,
    pub to_account: Option<String>,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtmRequest {
    pub iban: String,
    pub transaction_type: String,
    pub amount: Decimal,
}

/// Validates, records and applies money movements.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    // resolved once at startup
    house_account: Option<String>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, house_account: Option<String>) -> Self {
        Self {
            store,
            house_account: house_account.map(|iban| iban::normalize(&iban)),
        }
    }

    /// Move `amount` between two accounts on behalf of `actor`.
    pub async fn transfer(
        &self,
        actor: &Actor,
        request: TransferRequest,
    ) -> Result<Transaction, LedgerError> {
        let from_iban = request.from_account.as_deref().map(iban::normalize).unwrap_or_default();
        let to_iban = request.to_account.as_deref().map(iban::normalize).unwrap_or_default();
        if from_iban.is_empty() || to_iban.is_empty() {
            return Err(ValidationError::MissingAccountIdentifier.into());
        }
        if from_iban == to_iban {
            return Err(ValidationError::SameAccount.into());
        }

        let amount = request.amount;
        let draft = NewTransaction {
            from_account: from_iban,
            to_account: to_iban,
            transfer_amount: amount,
            description: request.description,
            transaction_type: TransactionType::Transfer,
        };

        let check: &TransferCheck<'_> = &|from, to| {
            if !actor.is_employee() && !from.is_some_and(|account| actor.owns(account)) {
                return Err(LedgerError::access_denied(
                    "user does not have access to the specified account",
                ));
            }
            validator::validate(from, to, amount)?;
            Ok(())
        };

        let result = self.store.execute_transfer(draft, check).await;
        log_outcome(actor, &result);
        result
    }

    /// Cash deposit or withdrawal against the house ATM account.
    pub async fn atm_transaction(
        &self,
        actor: &Actor,
        request: AtmRequest,
    ) -> Result<Transaction, LedgerError> {
        let customer_iban = iban::normalize(&request.iban);
        let customer = self
            .store
            .find_account_by_iban(&customer_iban)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("account with IBAN {customer_iban}")))?;

        if customer.owner().is_none() {
            return Err(ValidationError::NoAssociatedUser.into());
        }
        if !actor.can_access(&customer) {
            return Err(LedgerError::access_denied(
                "user does not have access to the specified account",
            ));
        }

        let house_iban = self
            .house_account
            .clone()
            .ok_or(LedgerError::AtmUserNotConfigured)?;
        if self.store.find_account_by_iban(&house_iban).await?.is_none() {
            return Err(LedgerError::AtmUserNotConfigured);
        }

        let kind = match request.transaction_type.parse::<TransactionType>() {
            Ok(kind @ (TransactionType::Deposit | TransactionType::Withdraw)) => kind,
            _ => {
                return Err(
                    ValidationError::InvalidAtmTransactionType(request.transaction_type).into(),
                )
            }
        };

        let amount = request.amount;
        if kind == TransactionType::Withdraw && customer.balance < amount {
            return Err(ValidationError::InsufficientBalanceForWithdrawal.into());
        }

        let (from_account, to_account, description) = match kind {
            TransactionType::Deposit => (house_iban, customer_iban, "ATM deposit"),
            _ => (customer_iban, house_iban, "ATM withdrawal"),
        };
        let draft = NewTransaction {
            from_account,
            to_account,
            transfer_amount: amount,
            description: Some(description.to_string()),
            transaction_type: kind,
        };

        // the house side carries no limits; only the customer side is checked
        let check: &TransferCheck<'_> = &|from, to| {
            let (house, customer) = match kind {
                TransactionType::Deposit => (from, to),
                _ => (to, from),
            };
            if house.is_none() {
                return Err(LedgerError::AtmUserNotConfigured);
            }
            let customer = customer.ok_or_else(|| LedgerError::not_found("account"))?;
            match kind {
                TransactionType::Deposit => validator::validate_deposit(customer, amount)?,
                _ => validator::validate_withdrawal(customer, amount)?,
            }
            Ok(())
        };

        let result = self.store.execute_transfer(draft, check).await;
        log_outcome(actor, &result);
        result
    }

    pub async fn search_transactions(
        &self,
        actor: &Actor,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>, LedgerError> {
        actor.require_employee("search transactions")?;
        Ok(self.store.search_transactions(filter).await?)
    }

    pub async fn transaction_by_id(
        &self,
        actor: &Actor,
        id: TransactionId,
    ) -> Result<Transaction, LedgerError> {
        actor.require_employee("view this transaction")?;
        self.store
            .find_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("transaction with ID {id}")))
    }

    pub async fn transactions_by_reference(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<Vec<Transaction>, LedgerError> {
        actor.require_employee("search transactions by reference")?;
        let found = self.store.find_by_reference(reference.trim()).await?;
        if found.is_empty() {
            return Err(LedgerError::not_found(format!("transaction with reference {reference}")));
        }
        Ok(found)
    }

    /// History of one account, for its owner or an employee.
    pub async fn transactions_by_iban(
        &self,
        actor: &Actor,
        raw_iban: &str,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let iban = iban::normalize(raw_iban);
        let account = self
            .store
            .find_account_by_iban(&iban)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("account with IBAN {iban}")))?;
        if !actor.can_access(&account) {
            return Err(LedgerError::access_denied(
                "user does not have access to the specified account",
            ));
        }
        let mut history = self.store.find_by_participant(&iban).await?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(history)
    }
}

fn log_outcome(actor: &Actor, result: &Result<Transaction, LedgerError>) {
    match result {
        Ok(tx) => tracing::info!(
            "{} {} committed by {}: {} -> {}, amount {}",
            tx.transaction_type.as_str(),
            tx.reference,
            actor.id,
            tx.from_account,
            tx.to_account,
            tx.transfer_amount
        ),
        Err(LedgerError::Internal(err)) => {
            tracing::error!("Ledger commit failed for {}: {err}", actor.id)
        }
        Err(err) => tracing::warn!("Ledger request by {} rejected: {err}", actor.id),
    }
}
