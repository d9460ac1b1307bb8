//! Shared plumbing for billing services: transport error type, configuration
//! loading, observability bootstrap, and common axum middleware.

pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
