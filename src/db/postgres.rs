use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{LedgerError, ValidationError};

use super::account::{
    Account, AccountFilter, AccountLimits, AccountState, AccountStore, AddressBookEntry,
};
use super::tx::{NewTransaction, Transaction, TransactionFilter, TransactionId, TransactionStore};
use super::user::{Role, User, UserChanges, UserStore, SYSTEM_USER_ID};
use super::utils::{like_pattern, Page, Pagination};
use super::{LedgerStore, StoreError, TransferCheck};

const ACCOUNT_COLUMNS: &str = "id, iban, owner_id, account_type, status, detached_at, balance, \
                               daily_limit, absolute_limit, balance_limit, created_at";
const TRANSACTION_COLUMNS: &str = "id, from_account, to_account, transfer_amount, description, \
                                   reference, executed_at, transaction_type";
const USER_COLUMNS: &str = "id, email, full_name, role, created_at, updated_at";

/// Postgres implementation of every store port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    iban: String,
    owner_id: Option<Uuid>,
    account_type: String,
    status: String,
    detached_at: Option<DateTime<Utc>>,
    balance: Decimal,
    daily_limit: Decimal,
    absolute_limit: Decimal,
    balance_limit: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let state = match (row.status.as_str(), row.owner_id, row.detached_at) {
            ("ACTIVE", Some(owner), _) => AccountState::Active { owner },
            ("DEACTIVATED", _, Some(detached_at)) => AccountState::Deactivated { detached_at },
            (status, ..) => {
                return Err(StoreError::Corrupt(format!(
                    "account {} has inconsistent status {status}",
                    row.iban
                )))
            }
        };
        Ok(Account {
            id: row.id,
            account_type: row.account_type.parse().map_err(StoreError::Corrupt)?,
            iban: row.iban,
            state,
            balance: row.balance,
            daily_limit: row.daily_limit,
            absolute_limit: row.absolute_limit,
            balance_limit: row.balance_limit,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: i64,
    from_account: String,
    to_account: String,
    transfer_amount: Decimal,
    description: Option<String>,
    reference: String,
    executed_at: DateTime<Utc>,
    transaction_type: String,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            from_account: row.from_account,
            to_account: row.to_account,
            transfer_amount: row.transfer_amount,
            description: row.description,
            reference: row.reference,
            timestamp: row.executed_at,
            transaction_type: row.transaction_type.parse().map_err(StoreError::Corrupt)?,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    full_name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role: row.role.parse::<Role>().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct AddressBookRow {
    name: String,
    iban: String,
}

impl From<AddressBookRow> for AddressBookEntry {
    fn from(row: AddressBookRow) -> Self {
        AddressBookEntry {
            name: row.name,
            iban: row.iban,
        }
    }
}

fn accounts_from(rows: Vec<AccountRow>) -> Result<Vec<Account>, StoreError> {
    rows.into_iter().map(Account::try_from).collect()
}

fn transactions_from(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, StoreError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn upsert_account<'e, E>(executor: E, account: &Account) -> Result<Account, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let (owner_id, detached_at) = match account.state {
        AccountState::Active { owner } => (Some(owner), None),
        AccountState::Deactivated { detached_at } => (None, Some(detached_at)),
    };
    let limits = account.limits();
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        r#"
        INSERT INTO accounts ({ACCOUNT_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE SET
            owner_id = EXCLUDED.owner_id,
            status = EXCLUDED.status,
            detached_at = EXCLUDED.detached_at,
            balance = EXCLUDED.balance,
            daily_limit = EXCLUDED.daily_limit,
            absolute_limit = EXCLUDED.absolute_limit,
            balance_limit = EXCLUDED.balance_limit
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(account.id)
    .bind(&account.iban)
    .bind(owner_id)
    .bind(account.account_type.as_str())
    .bind(account.state.status().as_str())
    .bind(detached_at)
    .bind(account.balance)
    .bind(limits.daily_limit)
    .bind(limits.absolute_limit)
    .bind(limits.balance_limit)
    .bind(account.created_at)
    .fetch_one(executor)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            StoreError::Conflict(format!("duplicate iban {}", account.iban))
        } else {
            StoreError::Database(err)
        }
    })?;
    row.try_into()
}

async fn next_transaction_id<'e, E>(executor: E) -> Result<TransactionId, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('transactions', 'id'))")
        .fetch_one(executor)
        .await
}

async fn insert_transaction<'e, E>(executor: E, tx: &Transaction) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(&format!(
        "INSERT INTO transactions ({TRANSACTION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    ))
    .bind(tx.id)
    .bind(&tx.from_account)
    .bind(&tx.to_account)
    .bind(tx.transfer_amount)
    .bind(&tx.description)
    .bind(&tx.reference)
    .bind(tx.timestamp)
    .bind(tx.transaction_type.as_str())
    .execute(executor)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            StoreError::Conflict(format!("duplicate reference {}", tx.reference))
        } else {
            StoreError::Database(err)
        }
    })?;
    Ok(())
}

fn push_account_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &AccountFilter) {
    builder.push(" WHERE TRUE");
    let needle = filter.needle();
    if !needle.is_empty() {
        builder
            .push(" AND LOWER(REPLACE(iban, ' ', '')) LIKE ")
            .push_bind(like_pattern(&needle));
    }
    if let Some(account_type) = filter.account_type {
        builder.push(" AND account_type = ").push_bind(account_type.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

fn push_address_book_filters(builder: &mut QueryBuilder<'_, Postgres>, name: &str) {
    builder
        .push(
            " FROM accounts a JOIN users u ON u.id = a.owner_id \
             WHERE a.status = 'ACTIVE' AND a.account_type = 'PAYMENT' \
             AND u.full_name IS NOT NULL AND u.id <> ",
        )
        .push_bind(SYSTEM_USER_ID)
        .push(" AND LOWER(u.full_name) LIKE ")
        .push_bind(like_pattern(name));
}

fn push_transaction_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    builder.push(" WHERE TRUE");
    let needle = filter.needle();
    if !needle.is_empty() {
        let pattern = like_pattern(&needle);
        builder
            .push(" AND (LOWER(from_account) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(to_account) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(reference) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(COALESCE(description, '')) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR CAST(id AS TEXT) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(kind) = filter.transaction_type {
        builder.push(" AND transaction_type = ").push_bind(kind.as_str());
    }
    if let Some(start) = filter.start {
        builder.push(" AND executed_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND executed_at <= ").push_bind(end);
    }
    if let Some(amount) = filter.amount {
        builder
            .push(format!(" AND ABS(transfer_amount) {} ", amount.operator.sql()))
            .push_bind(amount.amount.abs());
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_account_by_iban(&self, iban: &str) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE iban = $1"
        ))
        .bind(iban)
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn find_accounts_by_owner(&self, owner: Uuid) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner_id = $1 ORDER BY created_at"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        accounts_from(rows)
    }

    async fn iban_exists(&self, iban: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE iban = $1)")
            .bind(iban)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn save_account(&self, account: Account) -> Result<Account, StoreError> {
        upsert_account(&self.pool, &account).await
    }

    async fn save_accounts(&self, accounts: Vec<Account>) -> Result<Vec<Account>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(accounts.len());
        for account in &accounts {
            saved.push(upsert_account(&mut *tx, account).await?);
        }
        tx.commit().await?;
        Ok(saved)
    }

    async fn update_limits(
        &self,
        iban: &str,
        limits: AccountLimits,
    ) -> Result<Option<Account>, StoreError> {
        sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            UPDATE accounts
            SET daily_limit = $1, absolute_limit = $2, balance_limit = $3
            WHERE iban = $4
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(limits.daily_limit)
        .bind(limits.absolute_limit)
        .bind(limits.balance_limit)
        .bind(iban)
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn search_accounts(&self, filter: &AccountFilter) -> Result<Page<Account>, StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM accounts");
        push_account_filters(&mut count, filter);
        let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {ACCOUNT_COLUMNS} FROM accounts"));
        push_account_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, iban DESC LIMIT ")
            .push_bind(filter.pagination.limit)
            .push(" OFFSET ")
            .push_bind(filter.pagination.offset);
        let rows = select.build_query_as::<AccountRow>().fetch_all(&self.pool).await?;

        Ok(Page {
            data: accounts_from(rows)?,
            total_count,
        })
    }

    async fn search_address_book(
        &self,
        name: &str,
        pagination: Pagination,
    ) -> Result<Page<AddressBookEntry>, StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*)");
        push_address_book_filters(&mut count, name);
        let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::new("SELECT u.full_name AS name, a.iban");
        push_address_book_filters(&mut select, name);
        select
            .push(r#" ORDER BY u.full_name COLLATE "C", a.iban LIMIT "#)
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset);
        let rows = select
            .build_query_as::<AddressBookRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            data: rows.into_iter().map(AddressBookEntry::from).collect(),
            total_count,
        })
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn save_transaction(&self, draft: NewTransaction) -> Result<Transaction, StoreError> {
        let mut saved = self.save_transactions(vec![draft]).await?;
        saved
            .pop()
            .ok_or_else(|| StoreError::Corrupt("insert returned no transaction".to_string()))
    }

    async fn save_transactions(
        &self,
        drafts: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut db_tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = next_transaction_id(&mut *db_tx).await?;
            let tx = draft.into_transaction(id, Utc::now());
            insert_transaction(&mut *db_tx, &tx).await?;
            saved.push(tx);
        }
        db_tx.commit().await?;
        Ok(saved)
    }

    async fn find_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn find_by_participant(&self, iban: &str) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM transactions
            WHERE from_account = $1 OR to_account = $1
            ORDER BY executed_at DESC, id DESC
            "#
        ))
        .bind(iban)
        .fetch_all(&self.pool)
        .await?;
        transactions_from(rows)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;
        transactions_from(rows)
    }

    async fn search_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>, StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM transactions");
        push_transaction_filters(&mut count, filter);
        let total_count: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions"));
        push_transaction_filters(&mut select, filter);
        select
            .push(" ORDER BY executed_at DESC NULLS LAST, id DESC LIMIT ")
            .push_bind(filter.pagination.limit)
            .push(" OFFSET ")
            .push_bind(filter.pagination.offset);
        let rows = select
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            data: transactions_from(rows)?,
            total_count,
        })
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.full_name)
        .bind(&changes.email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::Conflict(format!("email of user {id} is taken"))
            } else {
                StoreError::Database(err)
            }
        })?
        .map(User::try_from)
        .transpose()
    }

    async fn approve_user(&self, id: Uuid, accounts: Vec<Account>) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET role = 'APPROVED', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND role = 'UNAPPROVED'
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::Conflict(format!("user {id} is not awaiting approval")))?;
        for account in &accounts {
            upsert_account(&mut *tx, account).await?;
        }
        tx.commit().await?;
        row.try_into()
    }

    async fn delete_user(
        &self,
        id: Uuid,
        detached_at: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            UPDATE accounts
            SET owner_id = NULL, status = 'DEACTIVATED', detached_at = $2
            WHERE owner_id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(detached_at)
        .fetch_all(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("user {id} does not exist")));
        }
        tx.commit().await?;
        accounts_from(rows)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn execute_transfer(
        &self,
        draft: NewTransaction,
        check: &TransferCheck<'_>,
    ) -> Result<Transaction, LedgerError> {
        if draft.from_account == draft.to_account {
            return Err(ValidationError::SameAccount.into());
        }

        // dropping `db_tx` without commit rolls everything back
        let mut db_tx = self.pool.begin().await.map_err(StoreError::from)?;

        // row locks are taken in IBAN order so opposite transfers cannot deadlock
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE iban = ANY($1) ORDER BY iban FOR UPDATE"
        ))
        .bind(vec![draft.from_account.clone(), draft.to_account.clone()])
        .fetch_all(&mut *db_tx)
        .await
        .map_err(StoreError::from)?;
        let locked = accounts_from(rows)?;
        let from = locked.iter().find(|a| a.iban == draft.from_account);
        let to = locked.iter().find(|a| a.iban == draft.to_account);

        check(from, to)?;
        let (Some(from), Some(to)) = (from, to) else {
            return Err(ValidationError::AccountsNotFound.into());
        };
        let (from_id, to_id) = (from.id, to.id);

        let id = next_transaction_id(&mut *db_tx).await.map_err(StoreError::from)?;
        let tx = draft.into_transaction(id, Utc::now());
        insert_transaction(&mut *db_tx, &tx).await?;

        for (account_id, delta) in [(from_id, -tx.transfer_amount), (to_id, tx.transfer_amount)] {
            sqlx::query("UPDATE accounts SET balance = balance + $1 WHERE id = $2")
                .bind(delta)
                .bind(account_id)
                .execute(&mut *db_tx)
                .await
                .map_err(StoreError::from)?;
        }

        db_tx.commit().await.map_err(StoreError::from)?;
        Ok(tx)
    }
}
