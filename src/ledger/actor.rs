use uuid::Uuid;

use crate::db::account::Account;
use crate::db::user::Role;
use crate::error::LedgerError;

/// The authenticated caller, as resolved by the access guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_employee(&self) -> bool {
        matches!(self.role, Role::Employee | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn owns(&self, account: &Account) -> bool {
        account.owner() == Some(self.id)
    }

    pub fn can_access(&self, account: &Account) -> bool {
        self.is_employee() || self.owns(account)
    }

    pub fn require_employee(&self, action: &str) -> Result<(), LedgerError> {
        if self.is_employee() {
            Ok(())
        } else {
            Err(LedgerError::access_denied(format!(
                "you do not have permission to {action}"
            )))
        }
    }

    pub fn require_admin(&self, action: &str) -> Result<(), LedgerError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(LedgerError::access_denied(format!(
                "only administrators may {action}"
            )))
        }
    }
}
