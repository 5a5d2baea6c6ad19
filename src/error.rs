use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::StoreError;

/// Business rejections. Every variant is raised before any mutation happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("both from account and to account must be provided")]
    MissingAccountIdentifier,
    #[error("accounts not found for the provided IBANs")]
    AccountsNotFound,
    #[error("from and to accounts cannot be the same")]
    SameAccount,
    #[error("account {0} is deactivated")]
    AccountInactive(String),
    #[error("savings accounts can only be used for transfers between accounts of the same owner")]
    SavingsOwnershipViolation,
    #[error("transfer amount must be greater than zero")]
    NonPositiveAmount,
    #[error("transfer amount exceeds the absolute limit of {limit}")]
    ExceedsAbsoluteLimit { limit: Decimal },
    #[error("insufficient balance: the balance may not drop below {floor}")]
    InsufficientBalance { floor: Decimal },
    #[error("transfer amount exceeds the daily limit of {limit}")]
    ExceedsDailyLimit { limit: Decimal },
    #[error("invalid transaction type for ATM transaction: {0}")]
    InvalidAtmTransactionType(String),
    #[error("insufficient balance for withdrawal")]
    InsufficientBalanceForWithdrawal,
    #[error("invalid account: no user associated")]
    NoAssociatedUser,
    #[error("user is already approved")]
    UserAlreadyApproved,
    #[error("invalid limits: {0}")]
    InvalidLimits(&'static str),
    #[error("invalid search filter: {0}")]
    InvalidSearchFilter(String),
    #[error("email address is already in use")]
    EmailInUse,
}

impl ValidationError {
    /// Stable machine readable reason, used as the `error` field of API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAccountIdentifier => "MISSING_ACCOUNT_IDENTIFIER",
            Self::AccountsNotFound => "ACCOUNTS_NOT_FOUND",
            Self::SameAccount => "SAME_ACCOUNT",
            Self::AccountInactive(_) => "ACCOUNT_INACTIVE",
            Self::SavingsOwnershipViolation => "SAVINGS_OWNERSHIP_VIOLATION",
            Self::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            Self::ExceedsAbsoluteLimit { .. } => "EXCEEDS_ABSOLUTE_LIMIT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::ExceedsDailyLimit { .. } => "EXCEEDS_DAILY_LIMIT",
            Self::InvalidAtmTransactionType(_) => "INVALID_ATM_TRANSACTION_TYPE",
            Self::InsufficientBalanceForWithdrawal => "INSUFFICIENT_BALANCE_FOR_WITHDRAWAL",
            Self::NoAssociatedUser => "NO_ASSOCIATED_USER",
            Self::UserAlreadyApproved => "USER_ALREADY_APPROVED",
            Self::InvalidLimits(_) => "INVALID_LIMITS",
            Self::InvalidSearchFilter(_) => "INVALID_SEARCH_FILTER",
            Self::EmailInUse => "EMAIL_IN_USE",
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user not authenticated")]
    Unauthorized,
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("ATM house account is not configured")]
    AtmUserNotConfigured,
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::Validation(reason) => reason.code(),
            Self::NotFound(_) => "NOT_FOUND",
            Self::AtmUserNotConfigured => "ATM_USER_NOT_CONFIGURED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The validation reason, if this is a business rejection.
    pub fn reason(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}
