use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

use super::utils::{Page, Pagination};
use super::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Payment,
    Savings,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "PAYMENT",
            Self::Savings => "SAVINGS",
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PAYMENT" => Ok(Self::Payment),
            "SAVINGS" => Ok(Self::Savings),
            other => Err(format!("unknown account type: {other}")),
        }
    }
}

/// Plain status discriminant, used for filtering and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Deactivated,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "DEACTIVATED" => Ok(Self::Deactivated),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// Lifecycle of an account. An active account always has an owner; a
/// deactivated one never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum AccountState {
    Active {
        owner: Uuid,
    },
    Deactivated {
        #[serde(rename = "detachedAt")]
        detached_at: DateTime<Utc>,
    },
}

impl AccountState {
    pub fn status(&self) -> AccountStatus {
        match self {
            Self::Active { .. } => AccountStatus::Active,
            Self::Deactivated { .. } => AccountStatus::Deactivated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLimits {
    /// Per-transfer cap; not aggregated over the calendar day.
    pub daily_limit: Decimal,
    /// Maximum amount of a single transfer.
    pub absolute_limit: Decimal,
    /// Lowest balance the account may reach, usually an overdraft floor below zero.
    pub balance_limit: Decimal,
}

/// Largest magnitude any configured limit may take.
pub const LIMIT_CEILING: Decimal = Decimal::from_parts(3567587328, 232, 0, false, 0);

impl AccountLimits {
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.daily_limit.is_sign_negative() {
            return Err(ValidationError::InvalidLimits("daily limit must not be negative"));
        }
        if self.absolute_limit.is_sign_negative() {
            return Err(ValidationError::InvalidLimits("absolute limit must not be negative"));
        }
        if self.balance_limit > Decimal::ZERO {
            return Err(ValidationError::InvalidLimits("balance limit must not be above zero"));
        }
        if self.daily_limit > LIMIT_CEILING
            || self.absolute_limit > LIMIT_CEILING
            || self.balance_limit < -LIMIT_CEILING
        {
            return Err(ValidationError::InvalidLimits("limits must stay within one trillion"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub iban: String,
    pub account_type: AccountType,
    #[serde(flatten)]
    pub state: AccountState,
    pub balance: Decimal,
    pub daily_limit: Decimal,
    pub absolute_limit: Decimal,
    pub balance_limit: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A fresh active account with a zero balance.
    pub fn open(owner: Uuid, iban: String, account_type: AccountType, limits: AccountLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            iban,
            account_type,
            state: AccountState::Active { owner },
            balance: Decimal::ZERO,
            daily_limit: limits.daily_limit,
            absolute_limit: limits.absolute_limit,
            balance_limit: limits.balance_limit,
            created_at: Utc::now(),
        }
    }

    pub fn owner(&self) -> Option<Uuid> {
        match self.state {
            AccountState::Active { owner } => Some(owner),
            AccountState::Deactivated { .. } => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, AccountState::Active { .. })
    }

    pub fn limits(&self) -> AccountLimits {
        AccountLimits {
            daily_limit: self.daily_limit,
            absolute_limit: self.absolute_limit,
            balance_limit: self.balance_limit,
        }
    }

    pub fn set_limits(&mut self, limits: AccountLimits) {
        self.daily_limit = limits.daily_limit;
        self.absolute_limit = limits.absolute_limit;
        self.balance_limit = limits.balance_limit;
    }

    /// Soft delete: the row stays so transaction history keeps resolving.
    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.state = AccountState::Deactivated { detached_at: at };
    }

    /// Both accounts are active and belong to the same user.
    pub fn same_owner(&self, other: &Account) -> bool {
        matches!((self.owner(), other.owner()), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.iban, self.account_type.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Substring of the IBAN; whitespace and case are ignored.
    pub query: String,
    pub account_type: Option<AccountType>,
    pub status: Option<AccountStatus>,
    pub pagination: Pagination,
}

impl AccountFilter {
    pub fn needle(&self) -> String {
        self.query
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase()
    }

    pub fn matches(&self, account: &Account) -> bool {
        if self.account_type.is_some_and(|t| t != account.account_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != account.state.status()) {
            return false;
        }
        let needle = self.needle();
        needle.is_empty() || account.iban.to_lowercase().contains(&needle)
    }
}

/// A payable account as listed in the address book: the holder's name and
/// the IBAN of their payment account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressBookEntry {
    pub name: String,
    pub iban: String,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account_by_iban(&self, iban: &str) -> Result<Option<Account>, StoreError>;

    async fn find_accounts_by_owner(&self, owner: Uuid) -> Result<Vec<Account>, StoreError>;

    async fn iban_exists(&self, iban: &str) -> Result<bool, StoreError>;

    /// Insert or fully overwrite an account row. Balances of existing
    /// accounts are only ever moved through `LedgerStore::execute_transfer`.
    async fn save_account(&self, account: Account) -> Result<Account, StoreError>;

    async fn save_accounts(&self, accounts: Vec<Account>) -> Result<Vec<Account>, StoreError>;

    /// Changes only the limit columns, leaving the balance untouched.
    async fn update_limits(
        &self,
        iban: &str,
        limits: AccountLimits,
    ) -> Result<Option<Account>, StoreError>;

    /// Newest accounts first.
    async fn search_accounts(&self, filter: &AccountFilter) -> Result<Page<Account>, StoreError>;

    /// Active payment accounts of customers whose name contains `name`,
    /// ignoring case, ordered by name. The system user is never listed.
    async fn search_address_book(
        &self,
        name: &str,
        pagination: Pagination,
    ) -> Result<Page<AddressBookEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> AccountLimits {
        AccountLimits {
            daily_limit: Decimal::from(800),
            absolute_limit: Decimal::from(500),
            balance_limit: Decimal::ZERO,
        }
    }

    #[test]
    fn deactivation_detaches_owner() {
        let owner = Uuid::new_v4();
        let mut account = Account::open(owner, "NL91SPYD0000000001".into(), AccountType::Payment, limits());
        assert_eq!(account.owner(), Some(owner));
        assert_eq!(account.balance, Decimal::ZERO);

        account.deactivate(Utc::now());
        assert!(!account.is_active());
        assert_eq!(account.owner(), None);
        assert_eq!(account.state.status(), AccountStatus::Deactivated);
    }

    #[test]
    fn detached_accounts_never_share_an_owner() {
        let owner = Uuid::new_v4();
        let mut a = Account::open(owner, "NL01".into(), AccountType::Savings, limits());
        let mut b = Account::open(owner, "NL02".into(), AccountType::Savings, limits());
        assert!(a.same_owner(&b));
        a.deactivate(Utc::now());
        b.deactivate(Utc::now());
        assert!(!a.same_owner(&b));
    }

    #[test]
    fn limits_reject_positive_floor() {
        let bad = AccountLimits {
            balance_limit: Decimal::from(500),
            ..limits()
        };
        assert_eq!(
            bad.check(),
            Err(ValidationError::InvalidLimits("balance limit must not be above zero"))
        );
        assert!(limits().check().is_ok());
    }

    #[test]
    fn limits_are_bounded() {
        assert_eq!(LIMIT_CEILING, Decimal::from(1_000_000_000_000_i64));
        let at_ceiling = AccountLimits {
            daily_limit: LIMIT_CEILING,
            absolute_limit: LIMIT_CEILING,
            balance_limit: -LIMIT_CEILING,
        };
        assert!(at_ceiling.check().is_ok());

        for bad in [
            AccountLimits { daily_limit: Decimal::MAX, ..limits() },
            AccountLimits { absolute_limit: LIMIT_CEILING + Decimal::ONE, ..limits() },
            AccountLimits { balance_limit: Decimal::MIN, ..limits() },
        ] {
            assert_eq!(
                bad.check(),
                Err(ValidationError::InvalidLimits("limits must stay within one trillion"))
            );
        }
    }

    #[test]
    fn filter_ignores_whitespace_and_case() {
        let account = Account::open(Uuid::new_v4(), "NL91SPYD0001234567".into(), AccountType::Payment, limits());
        let filter = AccountFilter {
            query: "spyd 0001".into(),
            ..Default::default()
        };
        assert!(filter.matches(&account));

        let savings_only = AccountFilter {
            account_type: Some(AccountType::Savings),
            ..Default::default()
        };
        assert!(!savings_only.matches(&account));
    }

    #[test]
    fn serializes_state_inline() {
        let owner = Uuid::new_v4();
        let account = Account::open(owner, "NL91SPYD0001234567".into(), AccountType::Savings, limits());
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["status"], "ACTIVE");
        assert_eq!(json["owner"], owner.to_string());
        assert_eq!(json["accountType"], "SAVINGS");
    }
}
