//! Retail-banking transaction and ledger engine with its HTTP surface.

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod routes;
