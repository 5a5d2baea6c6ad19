use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::db::account::{AccountFilter, AccountLimits};
use crate::db::utils::Pagination;
use crate::error::{LedgerError, ValidationError};
use crate::ledger::accounts::AccountService;

use super::{auth::AuthService, utils::authenticate};

type AccountState = (Arc<AuthService>, Arc<AccountService>);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSearchParams {
    pub query: Option<String>,
    pub account_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AccountSearchParams {
    pub fn into_filter(self) -> Result<AccountFilter, ValidationError> {
        let parse_err = ValidationError::InvalidSearchFilter;
        Ok(AccountFilter {
            query: self.query.unwrap_or_default(),
            account_type: self
                .account_type
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| raw.parse())
                .transpose()
                .map_err(parse_err)?,
            status: self
                .status
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| raw.parse())
                .transpose()
                .map_err(parse_err)?,
            pagination: Pagination::new(self.limit, self.offset),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AddressBookParams {
    pub query: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn search_address_book(
    headers: HeaderMap,
    State((service, accounts)): State<AccountState>,
    Query(params): Query<AddressBookParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let pagination = Pagination::new(params.limit, params.offset);
    let query = params.query.unwrap_or_default();
    let page = accounts.address_book(&actor, &query, pagination).await?;
    Ok(Json(page))
}

async fn get_account(
    headers: HeaderMap,
    State((service, accounts)): State<AccountState>,
    Path(iban): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let account = accounts.account_by_iban(&actor, &iban).await?;
    Ok(Json(account))
}

async fn search_accounts(
    headers: HeaderMap,
    State((service, accounts)): State<AccountState>,
    Query(params): Query<AccountSearchParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let filter = params.into_filter()?;
    let page = accounts.search_accounts(&actor, &filter).await?;
    Ok(Json(page))
}

async fn update_limits(
    headers: HeaderMap,
    State((service, accounts)): State<AccountState>,
    Path(iban): Path<String>,
    Json(limits): Json<AccountLimits>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let account = accounts.update_limits(&actor, &iban, limits).await?;
    Ok(Json(account))
}

pub fn account_routes(service: Arc<AuthService>, accounts: Arc<AccountService>) -> Router {
    Router::new()
        .route("/accounts/search", get(search_accounts))
        .route("/accounts/addressbook/search", get(search_address_book))
        .route("/accounts/iban/:iban", get(get_account))
        .route("/accounts/:iban/limits", put(update_limits))
        .with_state((service, accounts))
}
