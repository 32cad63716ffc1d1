//! Seeded environment and provider event builders

#![allow(dead_code)]

use std::sync::{Arc, Once};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tariff_billing::{epoch_to_utc, ProviderEvent, ReconciliationConfig, ReconciliationEngine};
use tariff_core::{CoreConfig, CoreServices, CreateBillingCycle, ManualClock};
use tariff_db::memory::MemoryStore;
use tariff_db::Repositories;
use tariff_types::{Customer, DurationUnit, FeatureValueType, Subscription};

static TRACING: Once = Once::new();

/// 2024-01-15 12:00 UTC
pub const PERIOD_START: i64 = 1_705_320_000;
/// 2024-02-15 12:00 UTC
pub const PERIOD_END: i64 = 1_707_998_400;
/// 2024-03-15 12:00 UTC
pub const NEXT_PERIOD_END: i64 = 1_710_504_000;

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    epoch_to_utc(secs).unwrap()
}

/// Seeded store with a reconciliation engine on a manual clock
///
/// Catalog: product `crm` with feature `seats`, plan `pro` and cycles
/// `pro-monthly` (price `price_pro_monthly`), `pro-annual` and `pro-weekly`
/// (no price ids). Customer `acme` exists without a provider mapping.
pub struct TestEnv {
    pub store: MemoryStore,
    pub repos: Repositories,
    pub clock: ManualClock,
    pub core: CoreServices,
    pub engine: Arc<ReconciliationEngine>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(ReconciliationConfig::default()).await
    }

    pub async fn with_config(config: ReconciliationConfig) -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let repos = store.repositories();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
        let core = CoreServices::with_clock(
            repos.clone(),
            CoreConfig::default(),
            Arc::new(clock.clone()),
        );
        let engine = Arc::new(
            ReconciliationEngine::new(repos.clone(), config).with_clock(Arc::new(clock.clone())),
        );

        let env = Self {
            store,
            repos,
            clock,
            core,
            engine,
        };
        env.seed().await;
        env
    }

    async fn seed(&self) {
        let catalog = &self.core.catalog;
        catalog.create_product("crm", "CRM").await.unwrap();
        catalog
            .create_feature("seats", "Seats", FeatureValueType::Numeric, "1")
            .await
            .unwrap();
        catalog.attach_feature("crm", "seats").await.unwrap();
        catalog.create_plan("crm", "pro", "Pro").await.unwrap();
        catalog.set_plan_feature_value("pro", "seats", "10").await.unwrap();

        for (key, unit, price) in [
            ("pro-monthly", DurationUnit::Months, Some("price_pro_monthly")),
            ("pro-annual", DurationUnit::Years, None),
            ("pro-weekly", DurationUnit::Weeks, None),
        ] {
            catalog
                .create_billing_cycle(CreateBillingCycle {
                    plan_key: "pro".to_string(),
                    key: key.to_string(),
                    display_name: key.to_string(),
                    duration_unit: unit,
                    duration_value: Some(1),
                    external_price_id: price.map(str::to_string),
                })
                .await
                .unwrap();
        }

        catalog
            .create_customer("acme", "Acme", "billing@acme.test")
            .await
            .unwrap();
    }

    pub async fn customer(&self, key: &str) -> Customer {
        self.core.catalog.get_customer(key).await.unwrap()
    }

    pub async fn subscription(&self, key: &str) -> Subscription {
        self.core.lifecycle.get_subscription(key).await.unwrap()
    }

    pub async fn subscription_count(&self) -> usize {
        let acme = self.customer("acme").await;
        self.repos
            .subscriptions
            .find_by_customer(acme.id())
            .await
            .unwrap()
            .len()
    }

    /// Link `acme` to provider customer `cus_1`
    pub async fn link_acme(&self) {
        let event = customer_event("evt_link_acme", "customer.created", "cus_1", json!({ "customer_key": "acme" }));
        self.engine.process_event(&event).await.unwrap();
    }

    /// Record provider subscription `sub_1` as `acme-pro`, created at [`PERIOD_START`]
    pub async fn create_acme_pro(&self) -> Subscription {
        self.link_acme().await;
        let event = event(
            "evt_create_sub_1",
            "customer.subscription.created",
            PERIOD_START,
            subscription_object("sub_1", "active"),
        );
        self.engine.process_event(&event).await.unwrap();
        self.subscription("acme-pro").await
    }
}

pub fn event(id: &str, event_type: &str, created: i64, object: Value) -> ProviderEvent {
    ProviderEvent::new(id, event_type, ts(created), object)
}

pub fn customer_event(id: &str, event_type: &str, external_id: &str, metadata: Value) -> ProviderEvent {
    event(
        id,
        event_type,
        PERIOD_START,
        json!({ "id": external_id, "email": "billing@acme.test", "metadata": metadata }),
    )
}

/// Provider subscription for customer `cus_1` on `price_pro_monthly`,
/// carrying `acme-pro` / `acme` metadata and the first monthly period
pub fn subscription_object(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "customer": "cus_1",
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": PERIOD_START,
        "current_period_end": PERIOD_END,
        "items": { "data": [
            { "price": { "id": "price_pro_monthly", "lookup_key": null } }
        ] },
        "metadata": { "subscription_key": "acme-pro", "customer_key": "acme" }
    })
}

pub fn invoice_object(subscription: Option<&str>, start: i64, end: i64) -> Value {
    json!({
        "id": "in_1",
        "customer": "cus_1",
        "subscription": subscription,
        "lines": { "data": [ { "period": { "start": start, "end": end } } ] }
    })
}
