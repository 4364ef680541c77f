//! Common test utilities for quota ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use quota_core::{Clock, ManualClock, MembershipLevel, PrincipalId, QuotaRecord};
use quota_service::{AppState, ServiceConfig, StoreBackend};
use quota_store::{MemoryStore, Store};

/// 2024-05-01 00:30 UTC, half an hour before the default daily reset hour.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap()
}

/// Test harness containing a wired service and the clock driving it.
pub struct TestHarness {
    /// Ledger, gate and configuration.
    pub state: AppState,
    /// Hand-driven time source shared with the scheduler.
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Create a harness over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness over a fresh in-memory store with custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Create a harness over an existing store.
    pub fn with_store(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let state = AppState::new(store, config, clock.clone());
        Self { state, clock }
    }

    /// The harness clock's current instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Open a fresh principal at `level`.
    pub fn open(&self, level: MembershipLevel) -> QuotaRecord {
        self.state
            .ledger
            .open_account(PrincipalId::generate(), level, self.now())
            .expect("Failed to open account")
    }
}

/// Default configuration pinned to the in-memory backend.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        store_backend: StoreBackend::Memory,
        ..ServiceConfig::default()
    }
}
