//! Quota ledger service.
//!
//! This crate wires the quota ledger together:
//!
//! - [`QuotaLedger`]: per-principal monthly and daily balances
//! - [`CooldownGate`]: flags that may change at most once per window
//! - [`RefreshScheduler`]: periodic refill of due balances
//! - [`ServiceConfig`]: environment-driven configuration
//!
//! # Trust boundary
//!
//! Callers are expected to have authenticated the principal and checked that it
//! owns the resource it names. Nothing in this crate performs identity checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod scheduler;
pub mod state;

pub use config::{ConfigError, ServiceConfig, StoreBackend};
pub use error::ServiceError;
pub use gate::CooldownGate;
pub use ledger::{QuotaLedger, RefreshReport};
pub use scheduler::{RefreshScheduler, Shard};
pub use state::{open_store, AppState};
