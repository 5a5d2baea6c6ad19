use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::Account;
use super::StoreError;

/// Owner of the house ATM account, seeded by the initial migration.
pub const SYSTEM_USER_ID: Uuid = Uuid::from_u128(0xa7a);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Unapproved,
    Approved,
    Employee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unapproved => "UNAPPROVED",
            Self::Approved => "APPROVED",
            Self::Employee => "EMPLOYEE",
            Self::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNAPPROVED" => Ok(Self::Unapproved),
            "APPROVED" => Ok(Self::Approved),
            "EMPLOYEE" => Ok(Self::Employee),
            "ADMIN" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile fields to overwrite; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.email.is_none()
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Apply `changes` and bump `updated_at`. `None` when the user does not
    /// exist; a taken email is a `Conflict`.
    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> Result<Option<User>, StoreError>;

    /// Promote an unapproved user and insert their new accounts in one unit.
    async fn approve_user(&self, id: Uuid, accounts: Vec<Account>) -> Result<User, StoreError>;

    /// Deactivate and detach every owned account, then remove the user.
    /// Returns the accounts as they were left behind.
    async fn delete_user(
        &self,
        id: Uuid,
        detached_at: DateTime<Utc>,
    ) -> Result<Vec<Account>, StoreError>;
}
