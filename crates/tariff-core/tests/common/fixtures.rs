//! Seeded in-memory environment

use std::sync::{Arc, Once};

use chrono::{DateTime, TimeZone, Utc};
use tariff_core::{CoreConfig, CoreServices, CreateBillingCycle, ManualClock};
use tariff_db::memory::MemoryStore;
use tariff_db::Repositories;
use tariff_types::{BillingCycle, Customer, DurationUnit, Feature, FeatureValueType, Plan, Product};

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

/// Store, repositories and services driven by a manual clock
pub struct TestEnv {
    pub store: MemoryStore,
    pub repos: Repositories,
    pub clock: ManualClock,
    pub core: CoreServices,
}

/// Catalog seeded by [`TestEnv::seed_catalog`]
///
/// Product `crm` carries features `seats` (numeric, default 1), `sso`
/// (toggle, default false) and `theme` (text, default light). Plan `pro`
/// sets seats=10 and sso=true; plan `starter-trial` sets seats=3 and
/// transitions to `pro-monthly` on expiry.
#[allow(dead_code)]
pub struct Catalog {
    pub product: Product,
    pub seats: Feature,
    pub sso: Feature,
    pub theme: Feature,
    pub pro: Plan,
    pub trial: Plan,
    pub pro_monthly: BillingCycle,
    pub pro_lifetime: BillingCycle,
    pub trial_14d: BillingCycle,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let repos = store.repositories();
        let clock = ManualClock::new(start_time());
        let core = CoreServices::with_clock(repos.clone(), CoreConfig::default(), Arc::new(clock.clone()));
        Self {
            store,
            repos,
            clock,
            core,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use tariff_core::Clock;
        self.clock.now()
    }

    pub async fn seed_catalog(&self) -> Catalog {
        let catalog = &self.core.catalog;

        catalog.create_product("crm", "CRM").await.unwrap();
        let seats = catalog
            .create_feature("seats", "Seats", FeatureValueType::Numeric, "1")
            .await
            .unwrap();
        let sso = catalog
            .create_feature("sso", "Single sign-on", FeatureValueType::Toggle, "false")
            .await
            .unwrap();
        let theme = catalog
            .create_feature("theme", "Theme", FeatureValueType::Text, "light")
            .await
            .unwrap();
        for key in ["seats", "sso", "theme"] {
            catalog.attach_feature("crm", key).await.unwrap();
        }

        catalog.create_plan("crm", "pro", "Pro").await.unwrap();
        catalog.set_plan_feature_value("pro", "seats", "10").await.unwrap();
        let pro = catalog.set_plan_feature_value("pro", "sso", "true").await.unwrap();

        catalog
            .create_plan("crm", "starter-trial", "Starter trial")
            .await
            .unwrap();
        catalog
            .set_plan_feature_value("starter-trial", "seats", "3")
            .await
            .unwrap();

        let pro_monthly = self
            .cycle("pro", "pro-monthly", DurationUnit::Months, Some(1), Some("price_pro_monthly"))
            .await;
        let pro_lifetime = self
            .cycle("pro", "pro-lifetime", DurationUnit::Forever, None, None)
            .await;
        let trial_14d = self
            .cycle("starter-trial", "trial-14d", DurationUnit::Days, Some(14), None)
            .await;
        let trial = catalog
            .set_plan_transition("starter-trial", Some("pro-monthly"))
            .await
            .unwrap();

        Catalog {
            product: catalog.get_product("crm").await.unwrap(),
            seats,
            sso,
            theme,
            pro,
            trial,
            pro_monthly,
            pro_lifetime,
            trial_14d,
        }
    }

    async fn cycle(
        &self,
        plan_key: &str,
        key: &str,
        unit: DurationUnit,
        value: Option<u32>,
        price: Option<&str>,
    ) -> BillingCycle {
        self.core
            .catalog
            .create_billing_cycle(CreateBillingCycle {
                plan_key: plan_key.to_string(),
                key: key.to_string(),
                display_name: key.to_string(),
                duration_unit: unit,
                duration_value: value,
                external_price_id: price.map(str::to_string),
            })
            .await
            .unwrap()
    }

    pub async fn customer(&self, key: &str) -> Customer {
        self.core
            .catalog
            .create_customer(key, key, &format!("{key}@example.test"))
            .await
            .unwrap()
    }
}
