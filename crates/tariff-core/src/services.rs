//! Wiring of the core services over one repository bundle

use std::sync::Arc;

use tariff_db::Repositories;

use crate::cache::CatalogCache;
use crate::catalog::CatalogService;
use crate::checker::FeatureChecker;
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::lifecycle::{BatchReport, SubscriptionLifecycleManager, TransitionedPair};

/// Result of one maintenance sweep
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub transitioned: BatchReport<TransitionedPair>,
    pub renewed: BatchReport<String>,
    pub expired: BatchReport<String>,
}

/// Catalog, checker and lifecycle sharing one cache
#[derive(Debug, Clone)]
pub struct CoreServices {
    pub catalog: CatalogService,
    pub checker: FeatureChecker,
    pub lifecycle: SubscriptionLifecycleManager,
    config: CoreConfig,
}

impl CoreServices {
    pub fn new(repos: Repositories, config: CoreConfig) -> Self {
        Self::with_clock(repos, config, Arc::new(SystemClock))
    }

    pub fn with_clock(repos: Repositories, config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let cache = CatalogCache::new(config.cache.clone());
        Self {
            catalog: CatalogService::new(repos.clone(), cache.clone()),
            checker: FeatureChecker::new(repos.clone(), cache),
            lifecycle: SubscriptionLifecycleManager::with_clock(repos, clock),
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Run transitions, renewals and expiry, each bounded by the batch limit
    pub async fn run_maintenance(&self) -> CoreResult<MaintenanceReport> {
        let limit = self.config.batch_limit;
        Ok(MaintenanceReport {
            transitioned: self.lifecycle.process_expired_transitions(limit).await?,
            renewed: self.lifecycle.process_due_renewals(limit).await?,
            expired: self.lifecycle.expire_lapsed(limit).await?,
        })
    }
}
