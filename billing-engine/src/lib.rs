//! Metered-billing lifecycle engine: usage ingestion, snapshot
//! enrichment, rating, balanced double-entry ledger postings, the billing
//! cycle scheduler, and the payment/dispute webhook pipeline.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
