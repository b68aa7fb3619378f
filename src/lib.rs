//! Prediction Gateway Library
//!
//! Edge component between untrusted clients and the identity and
//! prediction services.
//!
//! # Features
//!
//! - **Cached verification**: bearer credentials are verified once and the
//!   verdict is memoized for a bounded TTL
//! - **Result history**: per-user history served from a dual-indexed
//!   in-memory cache before falling back to Postgres
//! - **Write-behind**: new results reach the cache and the durable store
//!   without delaying the response
//! - **Production Ready**: structured logging, graceful shutdown with drain

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod model;
pub mod service;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))
}
