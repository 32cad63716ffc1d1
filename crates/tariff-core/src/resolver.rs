//! Feature value resolution
//!
//! A value is taken from the first tier that carries one:
//! subscription override, then plan value, then the feature default.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tariff_types::{Feature, Plan, PlanId, Subscription};

/// A subscription together with the plan its billing cycle belongs to
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionContext<'a> {
    pub subscription: &'a Subscription,
    pub plan_id: PlanId,
}

/// Resolve one feature against an optional plan and subscription
pub fn resolve(feature: &Feature, plan: Option<&Plan>, subscription: Option<&Subscription>) -> String {
    if let Some(o) = subscription.and_then(|s| s.override_for(feature.id())) {
        return o.value.clone();
    }
    if let Some(value) = plan.and_then(|p| p.feature_value(feature.id())) {
        return value.to_string();
    }
    feature.default_value().to_string()
}

/// Resolve every feature across several subscriptions.
///
/// Subscriptions are scanned in the given order: the first one carrying an
/// override wins, otherwise the first whose plan carries a value, otherwise
/// the default. Returns one value per feature key.
pub fn resolve_all(
    features: &[Feature],
    plans_by_id: &HashMap<PlanId, Plan>,
    subscriptions: &[SubscriptionContext<'_>],
) -> BTreeMap<String, String> {
    features
        .iter()
        .map(|feature| {
            let id = feature.id();
            let value = subscriptions
                .iter()
                .find_map(|ctx| ctx.subscription.override_for(id).map(|o| o.value.as_str()))
                .or_else(|| {
                    subscriptions.iter().find_map(|ctx| {
                        plans_by_id
                            .get(&ctx.plan_id)
                            .and_then(|plan| plan.feature_value(id))
                    })
                })
                .unwrap_or_else(|| feature.default_value());
            (feature.key().to_string(), value.to_string())
        })
        .collect()
}

/// Canonical precedence between concurrent subscriptions.
///
/// Most recently activated first (never-activated last), then most recently
/// created, then by key.
pub fn resolution_order(a: &Subscription, b: &Subscription) -> Ordering {
    b.activation_date()
        .cmp(&a.activation_date())
        .then_with(|| b.created_at().cmp(&a.created_at()))
        .then_with(|| a.key().cmp(b.key()))
}

/// Sort contexts into [`resolution_order`]
pub fn order_for_resolution(contexts: &mut [SubscriptionContext<'_>]) {
    contexts.sort_by(|a, b| resolution_order(a.subscription, b.subscription));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tariff_types::{
        BillingCycleId, CustomerId, FeatureValueType, NewSubscription, OverrideKind, ProductId,
    };

    fn subscription(key: &str, activated_days_ago: i64) -> Subscription {
        let now = Utc::now();
        Subscription::create(
            NewSubscription {
                key: key.to_string(),
                customer_id: CustomerId::new(),
                billing_cycle_id: BillingCycleId::new(),
                auto_renew: true,
                activation_date: Some(now - Duration::days(activated_days_ago)),
                trial_end_date: None,
                external_billing_id: None,
            },
            None,
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_precedence() {
        let seats = Feature::new("seats", "Seats", FeatureValueType::Numeric, "1").unwrap();
        let mut plan = Plan::new("pro", ProductId::new(), "Pro").unwrap();
        let mut sub = subscription("s", 1);

        assert_eq!(resolve(&seats, None, None), "1");
        assert_eq!(resolve(&seats, Some(&plan), Some(&sub)), "1");

        plan.set_feature_value(&seats, "10").unwrap();
        assert_eq!(resolve(&seats, Some(&plan), Some(&sub)), "10");

        sub.set_override(&seats, "50", OverrideKind::Permanent, Utc::now())
            .unwrap();
        assert_eq!(resolve(&seats, Some(&plan), Some(&sub)), "50");
        assert_eq!(resolve(&seats, None, Some(&sub)), "50");
    }

    #[test]
    fn test_resolve_all_first_override_wins_over_any_plan_value() {
        let seats = Feature::new("seats", "Seats", FeatureValueType::Numeric, "1").unwrap();
        let sso = Feature::new("sso", "SSO", FeatureValueType::Toggle, "false").unwrap();

        let mut first_plan = Plan::new("pro", ProductId::new(), "Pro").unwrap();
        first_plan.set_feature_value(&seats, "10").unwrap();
        let mut second_plan = Plan::new("team", ProductId::new(), "Team").unwrap();
        second_plan.set_feature_value(&sso, "true").unwrap();

        let first = subscription("a", 1);
        let mut second = subscription("b", 2);
        second
            .set_override(&seats, "99", OverrideKind::Temporary, Utc::now())
            .unwrap();

        let plans: HashMap<_, _> = [first_plan.clone(), second_plan.clone()]
            .into_iter()
            .map(|p| (p.id(), p))
            .collect();
        let contexts = [
            SubscriptionContext { subscription: &first, plan_id: first_plan.id() },
            SubscriptionContext { subscription: &second, plan_id: second_plan.id() },
        ];

        let values = resolve_all(&[seats, sso], &plans, &contexts);
        assert_eq!(values.len(), 2);
        assert_eq!(values["seats"], "99");
        assert_eq!(values["sso"], "true");
    }

    #[test]
    fn test_resolve_all_without_subscriptions_uses_defaults() {
        let seats = Feature::new("seats", "Seats", FeatureValueType::Numeric, "3").unwrap();
        let values = resolve_all(std::slice::from_ref(&seats), &HashMap::new(), &[]);
        assert_eq!(values["seats"], "3");
    }

    #[test]
    fn test_canonical_order() {
        let older = subscription("older", 10);
        let newer = subscription("newer", 1);
        let plan_id = PlanId::new();
        let mut contexts = vec![
            SubscriptionContext { subscription: &older, plan_id },
            SubscriptionContext { subscription: &newer, plan_id },
        ];

        order_for_resolution(&mut contexts);
        assert_eq!(contexts[0].subscription.key(), "newer");
        assert_eq!(resolution_order(&older, &older), Ordering::Equal);
    }
}
