use std::process;
use std::sync::Arc;

use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, validate_request::ValidateRequestHeaderLayer};
use tracing_subscriber::{fmt::{writer::BoxMakeWriter, Layer}, layer::SubscriberExt, EnvFilter, Registry};

use springyield_ledger::config::Config;
use springyield_ledger::db::auth::AuthRepository;
use springyield_ledger::db::postgres::PgStore;
use springyield_ledger::db::LedgerStore;
use springyield_ledger::ledger::accounts::{ensure_house_account, AccountService};
use springyield_ledger::ledger::LedgerEngine;
use springyield_ledger::routes::{self, auth::AuthService};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = Layer::new().json().with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set global subscriber: {err}");
        process::exit(1);
    }

    let database_pool = match process_database(&config.db_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        },
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let store: Arc<dyn LedgerStore> = Arc::new(PgStore::new(database_pool.clone()));

    // ATM requests answer 503 until the house account can be resolved
    let house_account = match ensure_house_account(store.as_ref(), &config.atm_account_iban).await {
        Ok(account) => {
            tracing::info!("House ATM account: {}", account.iban);
            Some(account.iban)
        }
        Err(err) => {
            tracing::warn!("House ATM account unavailable: {err}");
            None
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => {
            tracing::info!("Listening on port: {}", config.port);
            listener
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let engine = Arc::new(LedgerEngine::new(store.clone(), house_account));
    let accounts = Arc::new(AccountService::new(store, config.default_balance_limit));

    let router = match process_begin(database_pool, config.jwt_secret, engine, accounts) {
        Ok(router) => {
            tracing::info!("Routes constructed successfully");
            router
        }
        Err(err) => {
            tracing::error!("Failed to construct routes: {}", err);
            process::exit(1);
        }
    };

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

fn process_begin(
    db_pool: PgPool,
    jwt_secret: String,
    engine: Arc<LedgerEngine>,
    accounts: Arc<AccountService>,
) -> Result<Router, String> {
    let head_route = Router::new();

    let repo = AuthRepository::new(db_pool);
    let service = Arc::new(AuthService::new(repo, jwt_secret));

    let auth_routes = routes::auth::auth_routes(service.clone());
    let user_routes = routes::user::user_routes(service.clone(), accounts.clone())
        .route_layer(ValidateRequestHeaderLayer::custom(routes::utils::require_authorization));
    let account_routes = routes::account::account_routes(service.clone(), accounts)
        .route_layer(ValidateRequestHeaderLayer::custom(routes::utils::require_authorization));
    let transfer_routes = routes::tx::tx_route(service, engine)
        .route_layer(ValidateRequestHeaderLayer::custom(routes::utils::require_authorization))
        .route_layer(CompressionLayer::new().gzip(true));

    let router = head_route
        .nest("/v1", auth_routes)
        .nest("/v1", user_routes)
        .nest("/v1", account_routes)
        .nest("/v1", transfer_routes)
        .route_layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1MB limit

    Ok(router)
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    // the ledger depends on its schema, so a failed migration is fatal
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|err| format!("Failed to run migrations: {}", err))?;
    tracing::info!("Migrations run successfully");

    Ok(db_pool)
}
