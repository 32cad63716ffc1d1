//! Integration tests for customer feature resolution

mod common;

use chrono::Duration;
use common::TestEnv;
use tariff_core::{CancelMode, CoreError, CreateBillingCycle, CreateSubscription};
use tariff_types::{DurationUnit, FeatureValueType, OverrideKind};

async fn subscribe(env: &TestEnv, key: &str, cycle: &str) {
    env.core
        .lifecycle
        .create_subscription(CreateSubscription::new(key, "acme", cycle))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_defaults_without_subscription() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;

    let values = env
        .core
        .checker
        .get_all_features_for_customer("acme", "crm")
        .await
        .unwrap();

    assert_eq!(values.len(), 3);
    assert_eq!(values["seats"], "1");
    assert_eq!(values["sso"], "false");
    assert_eq!(values["theme"], "light");
}

#[tokio::test]
async fn test_override_beats_plan_beats_default() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    subscribe(&env, "acme-pro", "pro-monthly").await;
    let checker = &env.core.checker;

    assert_eq!(checker.get_value_for_customer("acme", "crm", "seats").await.unwrap(), "10");
    assert_eq!(checker.get_value_for_customer("acme", "crm", "theme").await.unwrap(), "light");

    env.core
        .lifecycle
        .set_override("acme-pro", "seats", "42", OverrideKind::Permanent)
        .await
        .unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "seats").await.unwrap(), "42");
    assert_eq!(checker.get_value_for_customer("acme", "crm", "sso").await.unwrap(), "true");
}

#[tokio::test]
async fn test_newest_subscription_wins_between_plans() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;

    subscribe(&env, "acme-trial", "trial-14d").await;
    env.clock.advance(Duration::days(1));
    subscribe(&env, "acme-pro", "pro-monthly").await;

    let values = env
        .core
        .checker
        .get_all_features_for_customer("acme", "crm")
        .await
        .unwrap();
    assert_eq!(values["seats"], "10");
}

#[tokio::test]
async fn test_any_override_beats_every_plan_value() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;

    subscribe(&env, "acme-trial", "trial-14d").await;
    env.clock.advance(Duration::days(1));
    subscribe(&env, "acme-pro", "pro-monthly").await;
    env.core
        .lifecycle
        .set_override("acme-trial", "seats", "5", OverrideKind::Temporary)
        .await
        .unwrap();

    let seats = env
        .core
        .checker
        .get_value_for_customer("acme", "crm", "seats")
        .await
        .unwrap();
    assert_eq!(seats, "5");
}

#[tokio::test]
async fn test_only_entitling_subscriptions_count() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    let checker = &env.core.checker;

    subscribe(&env, "acme-pro", "pro-monthly").await;
    env.core
        .lifecycle
        .cancel("acme-pro", CancelMode::AtPeriodEnd)
        .await
        .unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "sso").await.unwrap(), "true");

    env.core
        .lifecycle
        .cancel("acme-pro", CancelMode::Immediately)
        .await
        .unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "sso").await.unwrap(), "false");
}

#[tokio::test]
async fn test_trial_keeps_plan_access_through_renewal() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    let checker = &env.core.checker;

    env.core
        .lifecycle
        .create_subscription(
            CreateSubscription::new("acme-pro", "acme", "pro-monthly")
                .with_trial_end(env.now() + Duration::days(14)),
        )
        .await
        .unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "sso").await.unwrap(), "true");

    env.clock.advance(Duration::days(14));
    env.core.lifecycle.renew("acme-pro").await.unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "seats").await.unwrap(), "10");
}

#[tokio::test]
async fn test_subscriptions_to_other_products_are_ignored() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    let catalog = &env.core.catalog;

    catalog.create_product("erp", "ERP").await.unwrap();
    catalog.attach_feature("erp", "seats").await.unwrap();
    catalog.create_plan("erp", "erp-basic", "ERP basic").await.unwrap();
    catalog
        .set_plan_feature_value("erp-basic", "seats", "99")
        .await
        .unwrap();
    catalog
        .create_billing_cycle(CreateBillingCycle {
            plan_key: "erp-basic".to_string(),
            key: "erp-yearly".to_string(),
            display_name: "Yearly".to_string(),
            duration_unit: DurationUnit::Years,
            duration_value: Some(1),
            external_price_id: None,
        })
        .await
        .unwrap();
    subscribe(&env, "acme-erp", "erp-yearly").await;

    let checker = &env.core.checker;
    assert_eq!(checker.get_value_for_customer("acme", "crm", "seats").await.unwrap(), "1");
    assert_eq!(checker.get_value_for_customer("acme", "erp", "seats").await.unwrap(), "99");
}

#[tokio::test]
async fn test_lookup_errors() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    env.core
        .catalog
        .create_feature("exports", "Exports", FeatureValueType::Toggle, "false")
        .await
        .unwrap();
    let checker = &env.core.checker;

    let err = checker.get_value_for_customer("nobody", "crm", "seats").await.unwrap_err();
    assert_eq!(err, CoreError::not_found("customer", "nobody"));

    let err = checker.get_value_for_customer("acme", "erp", "seats").await.unwrap_err();
    assert_eq!(err, CoreError::not_found("product", "erp"));

    let err = checker.get_value_for_customer("acme", "crm", "colour").await.unwrap_err();
    assert_eq!(err, CoreError::not_found("feature", "colour"));

    let err = checker.get_value_for_customer("acme", "crm", "exports").await.unwrap_err();
    assert_eq!(err, CoreError::not_found("product feature", "crm/exports"));
}

#[tokio::test]
async fn test_archived_features_are_not_reported() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    let checker = &env.core.checker;

    assert!(checker
        .get_all_features_for_customer("acme", "crm")
        .await
        .unwrap()
        .contains_key("theme"));

    env.core.catalog.archive_feature("theme").await.unwrap();

    let values = checker.get_all_features_for_customer("acme", "crm").await.unwrap();
    assert!(!values.contains_key("theme"));
    assert!(checker
        .get_value_for_customer("acme", "crm", "theme")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_lookup_is_batched() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    subscribe(&env, "acme-trial", "trial-14d").await;
    subscribe(&env, "acme-pro", "pro-monthly").await;
    subscribe(&env, "acme-lifetime", "pro-lifetime").await;

    env.store.reset_calls();
    env.core
        .checker
        .get_all_features_for_customer("acme", "crm")
        .await
        .unwrap();

    assert_eq!(env.store.call_count("customers.find_by_key"), 1);
    assert_eq!(env.store.call_count("products.find_by_key"), 1);
    assert_eq!(env.store.call_count("features.find_by_ids"), 1);
    assert_eq!(env.store.call_count("subscriptions.find_by_customer"), 1);
    assert_eq!(env.store.call_count("billing_cycles.find_by_ids"), 1);
    assert_eq!(env.store.call_count("plans.find_by_ids"), 1);
    assert_eq!(env.store.total_calls(), 6);

    // Feature sets and plans now come from the cache
    env.store.reset_calls();
    env.core
        .checker
        .get_value_for_customer("acme", "crm", "seats")
        .await
        .unwrap();
    assert_eq!(env.store.calls_to("features"), 0);
    assert_eq!(env.store.calls_to("plans"), 0);
    assert_eq!(env.store.total_calls(), 4);
}

#[tokio::test]
async fn test_catalog_writes_invalidate_cached_values() {
    let env = TestEnv::new();
    env.seed_catalog().await;
    env.customer("acme").await;
    subscribe(&env, "acme-pro", "pro-monthly").await;
    let checker = &env.core.checker;

    assert_eq!(checker.get_value_for_customer("acme", "crm", "seats").await.unwrap(), "10");

    env.core
        .catalog
        .set_plan_feature_value("pro", "seats", "20")
        .await
        .unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "seats").await.unwrap(), "20");

    env.core.catalog.set_feature_default("theme", "dark").await.unwrap();
    assert_eq!(checker.get_value_for_customer("acme", "crm", "theme").await.unwrap(), "dark");
}
