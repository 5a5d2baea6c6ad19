use std::str::FromStr;

use rust_decimal::Decimal;

pub const DEFAULT_ATM_ACCOUNT_IBAN: &str = "NL00ATMS0000000001";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub jwt_secret: String,
    pub max_connection_pooling: u32,
    pub port: u16,
    pub log_file: String,
    pub atm_account_iban: String,
    pub default_balance_limit: Decimal,
}

impl Config {
    /// Reads the process environment, with `.env` files taken into account.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        // mandatory fields
        let db_url = lookup("DATABASE_URL").ok_or("DATABASE_URL must be set")?;
        // optional fields
        let jwt_secret = lookup("JWT_SECRET").unwrap_or("your-jwt-secret".to_string());
        let max_connection_pooling = parsed(&lookup, "MAX_CONNECTION_POOLING", 5)?;
        let port = parsed(&lookup, "PORT", 3000)?;
        let log_file = lookup("LOG_FILE").unwrap_or("app.log".to_string());
        let atm_account_iban =
            lookup("ATM_ACCOUNT_IBAN").unwrap_or(DEFAULT_ATM_ACCOUNT_IBAN.to_string());
        let default_balance_limit =
            parsed(&lookup, "DEFAULT_BALANCE_LIMIT", Decimal::new(-500, 0))?;

        if default_balance_limit > Decimal::ZERO {
            return Err("DEFAULT_BALANCE_LIMIT must not be above zero".to_string());
        }

        Ok(Self {
            db_url,
            jwt_secret,
            max_connection_pooling,
            port,
            log_file,
            atm_account_iban,
            default_balance_limit,
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
