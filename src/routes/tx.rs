use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::tx::{AmountFilter, AmountOperator, TransactionFilter, TransactionId};
use crate::db::utils::Pagination;
use crate::error::{LedgerError, ValidationError};
use crate::ledger::{AtmRequest, LedgerEngine, TransferRequest};

use super::{
    auth::AuthService,
    utils::{authenticate, parse_range_end, parse_range_start},
};

type TxState = (Arc<AuthService>, Arc<LedgerEngine>);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub amount: Option<String>,
    pub amount_operator: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SearchParams {
    pub fn into_filter(self) -> Result<TransactionFilter, ValidationError> {
        let transaction_type = match non_blank(self.transaction_type) {
            Some(raw) => Some(raw.parse().map_err(ValidationError::InvalidSearchFilter)?),
            None => None,
        };
        let start = non_blank(self.start_date)
            .map(|raw| parse_range_start(&raw))
            .transpose()?;
        let end = non_blank(self.end_date)
            .map(|raw| parse_range_end(&raw))
            .transpose()?;

        // an operator without an amount, or the reverse, filters nothing
        let amount = match (non_blank(self.amount), non_blank(self.amount_operator)) {
            (Some(amount), Some(operator)) => Some(AmountFilter {
                operator: operator.parse::<AmountOperator>()?,
                amount: amount.trim().parse::<Decimal>().map_err(|_| {
                    ValidationError::InvalidSearchFilter(format!("invalid amount: {amount}"))
                })?,
            }),
            _ => None,
        };

        Ok(TransactionFilter {
            query: self.query.unwrap_or_default(),
            transaction_type,
            start,
            end,
            amount,
            pagination: Pagination::new(self.limit, self.offset),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn create_transaction(
    headers: HeaderMap,
    State((service, engine)): State<TxState>,
    Json(request): Json<TransferRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    tracing::info!("Starting transaction creation process");
    let actor = authenticate(&headers, &service).await?;
    let transaction = engine.transfer(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn create_atm_transaction(
    headers: HeaderMap,
    State((service, engine)): State<TxState>,
    Json(request): Json<AtmRequest>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let transaction = engine.atm_transaction(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn search_transactions(
    headers: HeaderMap,
    State((service, engine)): State<TxState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let filter = params.into_filter()?;
    let page = engine.search_transactions(&actor, &filter).await?;
    tracing::info!("Search by {} matched {} transaction(s)", actor.id, page.total_count);
    Ok(Json(page))
}

async fn get_transaction(
    headers: HeaderMap,
    State((service, engine)): State<TxState>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let transaction = engine.transaction_by_id(&actor, transaction_id).await?;
    Ok(Json(transaction))
}

async fn get_by_reference(
    headers: HeaderMap,
    State((service, engine)): State<TxState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let transactions = engine.transactions_by_reference(&actor, &reference).await?;
    Ok(Json(transactions))
}

async fn list_by_iban(
    headers: HeaderMap,
    State((service, engine)): State<TxState>,
    Path(iban): Path<String>,
) -> Result<impl IntoResponse, LedgerError> {
    let actor = authenticate(&headers, &service).await?;
    let transactions = engine.transactions_by_iban(&actor, &iban).await?;
    Ok(Json(transactions))
}

pub fn tx_route(service: Arc<AuthService>, engine: Arc<LedgerEngine>) -> Router {
    Router::new()
        .route("/transactions", post(create_transaction))
        .route("/transactions/atm", post(create_atm_transaction))
        .route("/transactions/search", get(search_transactions))
        .route("/transactions/id/:id", get(get_transaction))
        .route("/transactions/reference/:reference", get(get_by_reference))
        .route("/transactions/iban/:iban", get(list_by_iban))
        .with_state((service, engine))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    use crate::db::tx::{NewTransaction, TransactionType};

    use super::*;

    #[test]
    fn empty_params_give_the_default_page() {
        let filter = SearchParams::default().into_filter().expect("filter");
        assert!(filter.query.is_empty());
        assert!(filter.transaction_type.is_none() && filter.amount.is_none());
        assert_eq!(filter.pagination, Pagination::new(None, None));
    }

    #[test]
    fn full_params_build_a_conjunctive_filter() {
        let params = SearchParams {
            query: Some("spyd".into()),
            transaction_type: Some("withdraw".into()),
            start_date: Some("2025-01-01T00:00:00".into()),
            end_date: Some("2025-01-31T23:59:59Z".into()),
            amount: Some("25.50".into()),
            amount_operator: Some("gt".into()),
            limit: Some(5),
            offset: Some(10),
        };
        let filter = params.into_filter().expect("filter");

        assert_eq!(filter.transaction_type, Some(TransactionType::Withdraw));
        assert_eq!(filter.start, Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(filter.end, Some(Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap()));
        let amount = filter.amount.expect("amount filter");
        assert_eq!(amount.operator, AmountOperator::Gt);
        assert_eq!(amount.amount, Decimal::new(2550, 2));
        assert_eq!((filter.pagination.limit, filter.pagination.offset), (5, 10));
    }

    #[test]
    fn single_day_range_includes_the_evening() {
        let params = SearchParams {
            start_date: Some("2025-01-31".into()),
            end_date: Some("2025-01-31".into()),
            ..SearchParams::default()
        };
        let filter = params.into_filter().expect("filter");

        let draft = NewTransaction {
            from_account: "NL01SPYD0000000001".into(),
            to_account: "NL01SPYD0000000002".into(),
            transfer_amount: Decimal::TEN,
            description: None,
            transaction_type: TransactionType::Transfer,
        };
        let evening = draft.clone().into_transaction(1, Utc.with_ymd_and_hms(2025, 1, 31, 18, 0, 0).unwrap());
        let next_day = draft.into_transaction(2, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        assert!(filter.matches(&evening));
        assert!(!filter.matches(&next_day));
    }

    #[test]
    fn amount_without_operator_is_ignored() {
        let params = SearchParams {
            amount: Some("10".into()),
            ..SearchParams::default()
        };
        assert!(params.into_filter().expect("filter").amount.is_none());
    }

    #[rstest]
    #[case(SearchParams { transaction_type: Some("REFUND".into()), ..SearchParams::default() })]
    #[case(SearchParams { start_date: Some("01/02/2025".into()), ..SearchParams::default() })]
    #[case(SearchParams {
        amount: Some("ten".into()),
        amount_operator: Some("eq".into()),
        ..SearchParams::default()
    })]
    #[case(SearchParams {
        amount: Some("10".into()),
        amount_operator: Some("between".into()),
        ..SearchParams::default()
    })]
    fn malformed_params_are_rejected(#[case] params: SearchParams) {
        assert!(matches!(
            params.into_filter(),
            Err(ValidationError::InvalidSearchFilter(_))
        ));
    }
}
