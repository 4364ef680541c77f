//! Application state.

use std::sync::Arc;

use quota_core::Clock;
use quota_store::{MemoryStore, Store};

use crate::config::{ServiceConfig, StoreBackend};
use crate::error::ServiceError;
use crate::gate::CooldownGate;
use crate::ledger::QuotaLedger;
use crate::scheduler::RefreshScheduler;

/// Components shared by every caller of the service.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Time source for the scheduler.
    pub clock: Arc<dyn Clock>,

    /// Quota accounting.
    pub ledger: Arc<QuotaLedger>,

    /// Cooldown-gated flags.
    pub gate: Arc<CooldownGate>,
}

impl AppState {
    /// Wire the ledger and gate over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let ledger = Arc::new(QuotaLedger::new(
            Arc::clone(&store),
            config.quota_schedule.clone(),
            config.daily_reset_hour,
        ));
        let gate = Arc::new(CooldownGate::new(
            Arc::clone(&store),
            config.cooldown_window(),
        ));

        Self {
            store,
            config,
            clock,
            ledger,
            gate,
        }
    }

    /// A refresh scheduler driven by this state's clock and configuration.
    #[must_use]
    pub fn scheduler(&self) -> RefreshScheduler {
        RefreshScheduler::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.clock),
            self.config.refresh_interval,
            self.config.refresh_shards,
        )
    }
}

/// Open the storage backend named by the configuration.
///
/// # Errors
///
/// - `ServiceError::UnsupportedBackend` if `RocksDB` was requested but not compiled in.
/// - `ServiceError::Store` if the database cannot be opened.
pub fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, ServiceError> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store - quota state will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StoreBackend::RocksDb => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            Ok(Arc::new(quota_store::RocksStore::open(&config.data_dir)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StoreBackend::RocksDb => Err(ServiceError::UnsupportedBackend(
            "rocksdb (build with the rocksdb-backend feature)".into(),
        )),
    }
}
