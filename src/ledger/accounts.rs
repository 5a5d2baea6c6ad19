use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::account::{Account, AccountFilter, AccountLimits, AccountType, AddressBookEntry};
use crate::db::user::{Role, User, UserChanges, SYSTEM_USER_ID};
use crate::db::utils::{Page, Pagination};
use crate::db::{LedgerStore, StoreError};
use crate::error::{LedgerError, ValidationError};

use super::actor::Actor;
use super::iban;

const IBAN_ATTEMPTS: usize = 16;

/// Limits of the house ATM account. High enough to never bind.
pub fn house_limits() -> AccountLimits {
    AccountLimits {
        daily_limit: Decimal::new(10_000_000_00, 2),
        absolute_limit: Decimal::new(5_000_000_00, 2),
        balance_limit: Decimal::new(-1_000_000_00, 2),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub daily_limit: Decimal,
    pub absolute_limit: Decimal,
    pub balance_limit: Option<Decimal>,
}

/// Profile fields a user may change on themselves, or an employee on anyone.
/// Roles move through approval and passwords through the auth routes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdateRequest {
    pub full_name: Option<String>,
    pub email: Option<serde_email::Email>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub accounts: Vec<Account>,
}

/// User approval, deactivation and account administration.
pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    default_balance_limit: Decimal,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, default_balance_limit: Decimal) -> Self {
        Self {
            store,
            default_balance_limit,
        }
    }

    pub async fn profile(&self, actor: &Actor, user_id: Uuid) -> Result<UserProfile, LedgerError> {
        if actor.id != user_id {
            actor.require_employee("view this user")?;
        }
        let (user, accounts) = futures::try_join!(
            self.store.find_user(user_id),
            self.store.find_accounts_by_owner(user_id)
        )?;
        let user = user.ok_or_else(|| LedgerError::not_found(format!("user {user_id}")))?;
        Ok(UserProfile { user, accounts })
    }

    pub async fn update_user(
        &self,
        actor: &Actor,
        user_id: Uuid,
        request: UserUpdateRequest,
    ) -> Result<User, LedgerError> {
        if actor.id != user_id {
            actor.require_employee("change this user")?;
        }
        if user_id == SYSTEM_USER_ID {
            return Err(LedgerError::access_denied("the system user cannot be changed"));
        }
        // blank names are ignored rather than stored
        let changes = UserChanges {
            full_name: request
                .full_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            email: request.email.map(|email| email.as_str().to_string()),
        };
        let user = match self.store.update_user(user_id, &changes).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(LedgerError::not_found(format!("user {user_id}"))),
            Err(StoreError::Conflict(_)) => return Err(ValidationError::EmailInUse.into()),
            Err(err) => return Err(err.into()),
        };
        tracing::info!("User {user_id} updated by {}", actor.id);
        Ok(user)
    }

    /// Find payment accounts to send money to by the holder's name.
    pub async fn address_book(
        &self,
        actor: &Actor,
        query: &str,
        pagination: Pagination,
    ) -> Result<Page<AddressBookEntry>, LedgerError> {
        if actor.role == Role::Unapproved {
            return Err(LedgerError::access_denied("unapproved users cannot search the address book"));
        }
        let name = query.trim();
        if name.is_empty() {
            let reason = "a name to search for is required".to_string();
            return Err(ValidationError::InvalidSearchFilter(reason).into());
        }
        let page = self.store.search_address_book(name, pagination).await?;
        if page.total_count == 0 {
            return Err(LedgerError::not_found(format!("account holder matching '{name}'")));
        }
        Ok(page)
    }

    pub async fn account_by_iban(&self, actor: &Actor, raw_iban: &str) -> Result<Account, LedgerError> {
        let iban = iban::normalize(raw_iban);
        let account = self
            .store
            .find_account_by_iban(&iban)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("account with IBAN {iban}")))?;
        if !actor.can_access(&account) {
            return Err(LedgerError::access_denied("you do not have permission to view this account"));
        }
        Ok(account)
    }

    pub async fn search_accounts(
        &self,
        actor: &Actor,
        filter: &AccountFilter,
    ) -> Result<Page<Account>, LedgerError> {
        actor.require_employee("search accounts")?;
        Ok(self.store.search_accounts(filter).await?)
    }

    pub async fn update_limits(
        &self,
        actor: &Actor,
        raw_iban: &str,
        limits: AccountLimits,
    ) -> Result<Account, LedgerError> {
        actor.require_employee("change account limits")?;
        limits.check()?;
        let iban = iban::normalize(raw_iban);
        let account = self
            .store
            .update_limits(&iban, limits)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("account with IBAN {iban}")))?;
        tracing::info!("Limits of {} updated by {}", account.iban, actor.id);
        Ok(account)
    }

    /// Approve a customer and open their payment and savings accounts.
    pub async fn approve_user(
        &self,
        actor: &Actor,
        user_id: Uuid,
        request: ApprovalRequest,
    ) -> Result<UserProfile, LedgerError> {
        actor.require_employee("approve users")?;
        let limits = AccountLimits {
            daily_limit: request.daily_limit,
            absolute_limit: request.absolute_limit,
            balance_limit: request.balance_limit.unwrap_or(self.default_balance_limit),
        };
        limits.check()?;

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("user {user_id}")))?;
        if user.role != Role::Unapproved {
            return Err(ValidationError::UserAlreadyApproved.into());
        }

        let payment_iban = self.unused_iban(&[]).await?;
        let savings_iban = self.unused_iban(&[&payment_iban]).await?;
        let accounts = vec![
            Account::open(user_id, payment_iban, AccountType::Payment, limits),
            Account::open(user_id, savings_iban, AccountType::Savings, limits),
        ];

        let user = self.store.approve_user(user_id, accounts.clone()).await?;
        tracing::info!("User {user_id} approved by {}", actor.id);
        Ok(UserProfile { user, accounts })
    }

    /// Remove a user. Their accounts stay behind, deactivated and detached,
    /// so recorded transactions keep resolving.
    pub async fn delete_user(&self, actor: &Actor, user_id: Uuid) -> Result<Vec<Account>, LedgerError> {
        actor.require_admin("delete users")?;
        if user_id == SYSTEM_USER_ID {
            return Err(LedgerError::access_denied("the system user cannot be deleted"));
        }
        if self.store.find_user(user_id).await?.is_none() {
            return Err(LedgerError::not_found(format!("user {user_id}")));
        }
        let detached = self.store.delete_user(user_id, Utc::now()).await?;
        tracing::info!(
            "User {user_id} deleted by {}, {} account(s) deactivated",
            actor.id,
            detached.len()
        );
        Ok(detached)
    }

    async fn unused_iban(&self, reserved: &[&String]) -> Result<String, LedgerError> {
        for _ in 0..IBAN_ATTEMPTS {
            let candidate = iban::generate(&mut rand::thread_rng());
            if reserved.contains(&&candidate) {
                continue;
            }
            if !self.store.iban_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(LedgerError::Internal("could not generate a unique IBAN".to_string()))
    }
}

/// Resolve the house ATM account, creating it under the system user on
/// first start.
pub async fn ensure_house_account(
    store: &dyn LedgerStore,
    raw_iban: &str,
) -> Result<Account, LedgerError> {
    let iban = iban::normalize(raw_iban);
    if let Some(account) = store.find_account_by_iban(&iban).await? {
        if !account.is_active() {
            return Err(LedgerError::AtmUserNotConfigured);
        }
        return Ok(account);
    }
    let mut account = Account::open(SYSTEM_USER_ID, iban, AccountType::Payment, house_limits());
    account.balance = Decimal::new(999_999_999_99, 2);
    let account = store.save_account(account).await?;
    tracing::info!("Provisioned house ATM account {}", account.iban);
    Ok(account)
}
