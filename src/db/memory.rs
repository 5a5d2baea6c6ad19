//! In-memory adapter for every store port, used by the unit tests.
//!
//! Each account sits behind its own async mutex; transfers take both locks
//! in IBAN order, so concurrent transfers over the same account serialize
//! without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::{LedgerError, ValidationError};

use super::account::{
    Account, AccountFilter, AccountLimits, AccountStore, AccountType, AddressBookEntry,
};
use super::tx::{NewTransaction, Transaction, TransactionFilter, TransactionId, TransactionStore};
use super::user::{Role, User, UserChanges, UserStore, SYSTEM_USER_ID};
use super::utils::{Page, Pagination};
use super::{LedgerStore, StoreError, TransferCheck};

type AccountHandle = Arc<Mutex<Account>>;

#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, AccountHandle>>,
    transactions: Mutex<Vec<Transaction>>,
    users: Mutex<HashMap<Uuid, User>>,
    next_id: AtomicI64,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, role: Role) -> User {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let user = User {
            id,
            email: format!("{id}@example.com"),
            full_name: None,
            role,
            created_at: now,
            updated_at: now,
        };
        self.users.lock().await.insert(id, user.clone());
        user
    }

    /// Make every following commit fail after validation, as a lost
    /// database connection would.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn transaction_count(&self) -> usize {
        self.transactions.lock().await.len()
    }

    async fn handle(&self, iban: &str) -> Option<AccountHandle> {
        self.accounts.read().await.get(iban).cloned()
    }

    async fn snapshot(&self) -> Vec<Account> {
        let handles: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut accounts = Vec::with_capacity(handles.len());
        for handle in handles {
            accounts.push(handle.lock().await.clone());
        }
        accounts
    }

    fn stamp(&self, draft: NewTransaction) -> Transaction {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        draft.into_transaction(id, Utc::now())
    }
}

async fn lock(handle: Option<AccountHandle>) -> Option<OwnedMutexGuard<Account>> {
    match handle {
        Some(handle) => Some(handle.lock_owned().await),
        None => None,
    }
}

fn push_unique(ledger: &mut Vec<Transaction>, tx: Transaction) -> Result<(), StoreError> {
    if ledger.iter().any(|existing| existing.reference == tx.reference) {
        return Err(StoreError::Conflict(format!("duplicate reference {}", tx.reference)));
    }
    ledger.push(tx);
    Ok(())
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_account_by_iban(&self, iban: &str) -> Result<Option<Account>, StoreError> {
        match self.handle(iban).await {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_accounts_by_owner(&self, owner: Uuid) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|account| account.owner() == Some(owner))
            .collect();
        accounts.sort_by_key(|account| account.created_at);
        Ok(accounts)
    }

    async fn iban_exists(&self, iban: &str) -> Result<bool, StoreError> {
        Ok(self.accounts.read().await.contains_key(iban))
    }

    async fn save_account(&self, account: Account) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.write().await;
        match accounts.get(&account.iban) {
            Some(handle) => {
                let mut current = handle.lock().await;
                if current.id != account.id {
                    return Err(StoreError::Conflict(format!("duplicate iban {}", account.iban)));
                }
                *current = account.clone();
            }
            None => {
                accounts.insert(account.iban.clone(), Arc::new(Mutex::new(account.clone())));
            }
        }
        Ok(account)
    }

    async fn save_accounts(&self, accounts: Vec<Account>) -> Result<Vec<Account>, StoreError> {
        let mut saved = Vec::with_capacity(accounts.len());
        for account in accounts {
            saved.push(self.save_account(account).await?);
        }
        Ok(saved)
    }

    async fn update_limits(
        &self,
        iban: &str,
        limits: AccountLimits,
    ) -> Result<Option<Account>, StoreError> {
        let Some(handle) = self.handle(iban).await else {
            return Ok(None);
        };
        let mut account = handle.lock().await;
        account.set_limits(limits);
        Ok(Some(account.clone()))
    }

    async fn search_accounts(&self, filter: &AccountFilter) -> Result<Page<Account>, StoreError> {
        let mut accounts: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|account| filter.matches(account))
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.iban.cmp(&a.iban)));
        Ok(filter.pagination.apply(accounts))
    }

    async fn search_address_book(
        &self,
        name: &str,
        pagination: Pagination,
    ) -> Result<Page<AddressBookEntry>, StoreError> {
        let needle = name.to_lowercase();
        let users = self.users.lock().await.clone();
        let mut entries: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|account| account.is_active() && account.account_type == AccountType::Payment)
            .filter_map(|account| {
                let owner = account.owner().filter(|owner| *owner != SYSTEM_USER_ID)?;
                let name = users.get(&owner)?.full_name.clone()?;
                name.to_lowercase().contains(&needle).then_some(AddressBookEntry {
                    name,
                    iban: account.iban,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.iban.cmp(&b.iban)));
        Ok(pagination.apply(entries))
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn save_transaction(&self, draft: NewTransaction) -> Result<Transaction, StoreError> {
        let tx = self.stamp(draft);
        push_unique(&mut *self.transactions.lock().await, tx.clone())?;
        Ok(tx)
    }

    async fn save_transactions(
        &self,
        drafts: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut ledger = self.transactions.lock().await;
        let stamped: Vec<_> = drafts.into_iter().map(|draft| self.stamp(draft)).collect();
        let mut staged = ledger.clone();
        for tx in &stamped {
            push_unique(&mut staged, tx.clone())?;
        }
        *ledger = staged;
        Ok(stamped)
    }

    async fn find_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.lock().await.iter().find(|tx| tx.id == id).cloned())
    }

    async fn find_by_participant(&self, iban: &str) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .transactions
            .lock()
            .await
            .iter()
            .filter(|tx| tx.involves(iban))
            .cloned()
            .collect())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .transactions
            .lock()
            .await
            .iter()
            .filter(|tx| tx.reference == reference)
            .cloned()
            .collect())
    }

    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>, StoreError> {
        let mut matches: Vec<_> = self
            .transactions
            .lock()
            .await
            .iter()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(filter.pagination.apply(matches))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().await;
        if let Some(email) = &changes.email {
            if users.values().any(|other| other.id != id && other.email == *email) {
                return Err(StoreError::Conflict(format!("email {email} is taken")));
            }
        }
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(full_name) = &changes.full_name {
            user.full_name = Some(full_name.clone());
        }
        if let Some(email) = &changes.email {
            user.email = email.clone();
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn approve_user(&self, id: Uuid, accounts: Vec<Account>) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(&id)
            .filter(|user| user.role == Role::Unapproved)
            .ok_or_else(|| StoreError::Conflict(format!("user {id} is not awaiting approval")))?;
        {
            let existing = self.accounts.read().await;
            if let Some(taken) = accounts.iter().find(|a| existing.contains_key(&a.iban)) {
                return Err(StoreError::Conflict(format!("duplicate iban {}", taken.iban)));
            }
        }
        user.role = Role::Approved;
        user.updated_at = Utc::now();
        let approved = user.clone();
        drop(users);
        self.save_accounts(accounts).await?;
        Ok(approved)
    }

    async fn delete_user(
        &self,
        id: Uuid,
        detached_at: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let mut users = self.users.lock().await;
        if users.remove(&id).is_none() {
            return Err(StoreError::Conflict(format!("user {id} does not exist")));
        }
        let handles: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut detached = Vec::new();
        for handle in handles {
            let mut account = handle.lock().await;
            if account.owner() == Some(id) {
                account.deactivate(detached_at);
                detached.push(account.clone());
            }
        }
        Ok(detached)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn execute_transfer(
        &self,
        draft: NewTransaction,
        check: &TransferCheck<'_>,
    ) -> Result<Transaction, LedgerError> {
        if draft.from_account == draft.to_account {
            return Err(ValidationError::SameAccount.into());
        }

        let from_handle = self.handle(&draft.from_account).await;
        let to_handle = self.handle(&draft.to_account).await;
        let (mut from, mut to) = if draft.from_account < draft.to_account {
            let from = lock(from_handle).await;
            (from, lock(to_handle).await)
        } else {
            let to = lock(to_handle).await;
            (lock(from_handle).await, to)
        };

        check(from.as_deref(), to.as_deref())?;

        let (Some(from), Some(to)) = (from.as_mut(), to.as_mut()) else {
            return Err(ValidationError::AccountsNotFound.into());
        };
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit failed".to_string()).into());
        }

        let amount: Decimal = draft.transfer_amount;
        let (Some(debited), Some(credited)) =
            (from.balance.checked_sub(amount), to.balance.checked_add(amount))
        else {
            return Err(StoreError::Corrupt("balance out of range".to_string()).into());
        };
        let tx = self.stamp(draft);
        push_unique(&mut *self.transactions.lock().await, tx.clone())?;
        from.balance = debited;
        to.balance = credited;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use crate::db::tx::TransactionType;

    use super::*;

    fn limits() -> AccountLimits {
        AccountLimits {
            daily_limit: Decimal::from(1000),
            absolute_limit: Decimal::from(1000),
            balance_limit: Decimal::ZERO,
        }
    }

    fn draft(from: &str, to: &str, amount: i64, description: &str) -> NewTransaction {
        NewTransaction {
            from_account: from.into(),
            to_account: to.into(),
            transfer_amount: Decimal::from(amount),
            description: Some(description.into()),
            transaction_type: TransactionType::Transfer,
        }
    }

    #[tokio::test]
    async fn search_sorts_newest_first_and_paginates() {
        let store = MemoryStore::new();
        let saved = store
            .save_transactions(vec![
                draft("NL01", "NL02", 10, "first"),
                draft("NL01", "NL03", 20, "second"),
                draft("NL02", "NL03", 30, "third"),
            ])
            .await
            .unwrap();
        // force distinct timestamps regardless of clock resolution
        {
            let mut ledger = store.transactions.lock().await;
            for (offset, tx) in ledger.iter_mut().enumerate() {
                tx.timestamp = Utc::now() - Duration::minutes(10 - offset as i64);
            }
        }
        assert_eq!(saved.len(), 3);

        let filter = TransactionFilter {
            query: "nl01".into(),
            pagination: Pagination::new(Some(1), Some(0)),
            ..Default::default()
        };
        let page = store.search_transactions(&filter).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].description.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn participant_and_reference_lookups() {
        let store = MemoryStore::new();
        let tx = store.save_transaction(draft("NL01", "NL02", 10, "coffee")).await.unwrap();
        store.save_transaction(draft("NL03", "NL04", 10, "tea")).await.unwrap();

        assert_eq!(store.find_by_participant("NL02").await.unwrap(), vec![tx.clone()]);
        assert_eq!(store.find_by_reference(&tx.reference).await.unwrap(), vec![tx.clone()]);
        assert_eq!(store.find_transaction(tx.id).await.unwrap(), Some(tx));
        assert_eq!(store.find_transaction(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_account_rejects_iban_reuse() {
        let store = MemoryStore::new();
        let first = Account::open(Uuid::new_v4(), "NL01".into(), AccountType::Payment, limits());
        let second = Account::open(Uuid::new_v4(), "NL01".into(), AccountType::Payment, limits());
        store.save_account(first).await.unwrap();
        assert!(matches!(
            store.save_account(second).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn update_limits_keeps_balance() {
        let store = MemoryStore::new();
        let mut account = Account::open(Uuid::new_v4(), "NL01".into(), AccountType::Payment, limits());
        account.balance = Decimal::from(75);
        store.save_account(account).await.unwrap();

        let updated = store
            .update_limits(
                "NL01",
                AccountLimits {
                    daily_limit: Decimal::from(5),
                    absolute_limit: Decimal::from(5),
                    balance_limit: Decimal::from(-5),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.balance, Decimal::from(75));
        assert_eq!(updated.daily_limit, Decimal::from(5));
        assert!(store.update_limits("NL99", limits()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrepresentable_balances_leave_the_ledger_untouched() {
        let store = MemoryStore::new();
        let mut from = Account::open(Uuid::new_v4(), "NL01".into(), AccountType::Payment, limits());
        from.balance = Decimal::from(10);
        let mut to = Account::open(Uuid::new_v4(), "NL02".into(), AccountType::Payment, limits());
        to.balance = Decimal::MAX;
        store.save_accounts(vec![from, to]).await.unwrap();

        let accept: &TransferCheck<'_> = &|_, _| Ok(());
        let result = store.execute_transfer(draft("NL01", "NL02", 1, "overflow"), accept).await;

        assert!(matches!(result, Err(LedgerError::Internal(_))));
        let from = store.find_account_by_iban("NL01").await.unwrap().unwrap();
        let to = store.find_account_by_iban("NL02").await.unwrap().unwrap();
        assert_eq!(from.balance, Decimal::from(10));
        assert_eq!(to.balance, Decimal::MAX);
        assert_eq!(store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn address_book_lists_named_active_payment_accounts() {
        let store = MemoryStore::new();
        let alice = store.insert_user(Role::Approved).await;
        let nameless = store.insert_user(Role::Approved).await;
        let changes = UserChanges {
            full_name: Some("Alice Jansen".into()),
            ..UserChanges::default()
        };
        store.update_user(alice.id, &changes).await.unwrap().unwrap();

        let mut closed = Account::open(alice.id, "NL03".into(), AccountType::Payment, limits());
        closed.deactivate(Utc::now());
        store
            .save_accounts(vec![
                Account::open(alice.id, "NL01".into(), AccountType::Payment, limits()),
                Account::open(alice.id, "NL02".into(), AccountType::Savings, limits()),
                closed,
                Account::open(nameless.id, "NL04".into(), AccountType::Payment, limits()),
            ])
            .await
            .unwrap();

        let page = store.search_address_book("JANS", Pagination::default()).await.unwrap();
        assert_eq!(
            page.data,
            vec![AddressBookEntry {
                name: "Alice Jansen".into(),
                iban: "NL01".into()
            }]
        );
        assert!(store.search_address_book("bob", Pagination::default()).await.unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn update_user_rejects_a_taken_email() {
        let store = MemoryStore::new();
        let first = store.insert_user(Role::Approved).await;
        let second = store.insert_user(Role::Approved).await;

        let steal = UserChanges {
            email: Some(first.email.clone()),
            ..UserChanges::default()
        };
        assert!(matches!(
            store.update_user(second.id, &steal).await,
            Err(StoreError::Conflict(_))
        ));
        // re-saving your own address is not a conflict
        assert!(store.update_user(first.id, &steal).await.unwrap().is_some());
        assert!(store.update_user(Uuid::new_v4(), &UserChanges::default()).await.unwrap().is_none());
    }
}
