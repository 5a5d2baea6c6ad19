use rust_decimal::Decimal;

use crate::db::account::{Account, AccountType};
use crate::error::ValidationError;

/// Decide whether `amount` may move from `from` to `to`.
///
/// The order of the checks is fixed so the same request always yields the
/// same reason: existence, activity, savings ownership, positive amount,
/// absolute limit, balance floor, daily limit.
pub fn validate(
    from: Option<&Account>,
    to: Option<&Account>,
    amount: Decimal,
) -> Result<(), ValidationError> {
    let (Some(from), Some(to)) = (from, to) else {
        return Err(ValidationError::AccountsNotFound);
    };

    for account in [from, to] {
        if !account.is_active() {
            return Err(ValidationError::AccountInactive(account.iban.clone()));
        }
    }

    let touches_savings =
        from.account_type == AccountType::Savings || to.account_type == AccountType::Savings;
    if touches_savings && !from.same_owner(to) {
        return Err(ValidationError::SavingsOwnershipViolation);
    }

    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }

    if amount > from.absolute_limit {
        return Err(ValidationError::ExceedsAbsoluteLimit {
            limit: from.absolute_limit,
        });
    }

    // an unrepresentable remainder is below any floor
    let within_floor = from
        .balance
        .checked_sub(amount)
        .is_some_and(|remaining| remaining >= from.balance_limit);
    if !within_floor {
        return Err(ValidationError::InsufficientBalance {
            floor: from.balance_limit,
        });
    }

    // TODO: aggregate same-day transfers once a rolling daily total is a requirement
    if amount > from.daily_limit {
        return Err(ValidationError::ExceedsDailyLimit {
            limit: from.daily_limit,
        });
    }

    Ok(())
}

/// Checks for cash leaving a customer account through the house ATM account.
///
/// The house account has no limits of its own; the customer must cover the
/// whole amount from their balance (the overdraft floor does not apply) and
/// stay within their per-transfer caps.
pub fn validate_withdrawal(customer: &Account, amount: Decimal) -> Result<(), ValidationError> {
    if !customer.is_active() {
        return Err(ValidationError::AccountInactive(customer.iban.clone()));
    }
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }
    if customer.balance < amount {
        return Err(ValidationError::InsufficientBalanceForWithdrawal);
    }
    if amount > customer.absolute_limit {
        return Err(ValidationError::ExceedsAbsoluteLimit {
            limit: customer.absolute_limit,
        });
    }
    if amount > customer.daily_limit {
        return Err(ValidationError::ExceedsDailyLimit {
            limit: customer.daily_limit,
        });
    }
    Ok(())
}

/// Checks for cash entering a customer account from the house ATM account.
pub fn validate_deposit(customer: &Account, amount: Decimal) -> Result<(), ValidationError> {
    if !customer.is_active() {
        return Err(ValidationError::AccountInactive(customer.iban.clone()));
    }
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}
