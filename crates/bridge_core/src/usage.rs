//! crates/bridge_core/src/usage.rs
//!
//! The usage ledger: plan limits, quota checks and usage accounting.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{SubscriptionPlan, SubscriptionStatus, UsageSnapshot, User};
use crate::ports::{DatabaseService, PortResult};

/// Where clients send users who have run out of translations.
pub const UPGRADE_URL: &str = "/settings/billing";

/// Error code attached to every quota denial.
pub const QUOTA_EXCEEDED_CODE: &str = "TRANSLATION_LIMIT_EXCEEDED";

/// Number of translations included in a plan. `None` means no plan was ever
/// assigned, which is treated as the free tier.
pub fn translation_limit(plan: Option<SubscriptionPlan>) -> u32 {
    match plan {
        Some(SubscriptionPlan::Free) | None => 5,
        Some(SubscriptionPlan::Starter) => 100,
        Some(SubscriptionPlan::Pro) => 1_000,
        Some(SubscriptionPlan::Enterprise) => 10_000,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    pub family_sharing: bool,
    pub priority_support: bool,
    pub custom_domains: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOverview {
    pub plan: SubscriptionPlan,
    pub translation_limit: u32,
    pub features: PlanFeatures,
}

pub fn plan_features(plan: SubscriptionPlan) -> PlanOverview {
    let paid_tier = matches!(plan, SubscriptionPlan::Pro | SubscriptionPlan::Enterprise);
    PlanOverview {
        plan,
        translation_limit: translation_limit(Some(plan)),
        features: PlanFeatures {
            family_sharing: paid_tier,
            priority_support: paid_tier,
            custom_domains: plan == SubscriptionPlan::Enterprise,
        },
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub limit: u32,
    pub count: u32,
    pub plan: SubscriptionPlan,
}

impl QuotaStatus {
    /// The upgrade prompt shown with a denial.
    pub fn message(&self) -> String {
        format!(
            "You have reached your translation limit of {} translations. Please upgrade your plan to continue.",
            self.limit
        )
    }

    pub fn usage(&self) -> UsageSnapshot {
        UsageSnapshot {
            count: self.count,
            limit: self.limit,
        }
    }
}

/// Reads the user's count against their limit. No side effects.
pub fn quota_status(user: &User) -> QuotaStatus {
    QuotaStatus {
        allowed: user.translation_count < user.translation_limit,
        limit: user.translation_limit,
        count: user.translation_count,
        plan: user.subscription_plan,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageOverview {
    pub quota: QuotaStatus,
    pub plan: PlanOverview,
    pub subscription_status: Option<SubscriptionStatus>,
}

/// Gates translation requests and accounts for consumption.
#[derive(Clone)]
pub struct UsageLedger {
    db: Arc<dyn DatabaseService>,
}

impl UsageLedger {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn check_quota(&self, user_id: Uuid) -> PortResult<QuotaStatus> {
        let user = self.db.get_user(user_id).await?;
        Ok(quota_status(&user))
    }

    /// Quota, plan features and subscription state for the account page.
    pub async fn overview(&self, user_id: Uuid) -> PortResult<UsageOverview> {
        let user = self.db.get_user(user_id).await?;
        Ok(UsageOverview {
            quota: quota_status(&user),
            plan: plan_features(user.subscription_plan),
            subscription_status: user.subscription_status,
        })
    }

    /// Consumes one translation. Fails with `PortError::QuotaExceeded` instead
    /// of pushing the count past the limit.
    pub async fn record_usage(&self, user_id: Uuid) -> PortResult<UsageSnapshot> {
        self.db.record_usage(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use crate::testing::{sample_user, InMemoryDatabase};

    #[test]
    fn limits_follow_the_plan_table() {
        assert_eq!(translation_limit(Some(SubscriptionPlan::Free)), 5);
        assert_eq!(translation_limit(Some(SubscriptionPlan::Starter)), 100);
        assert_eq!(translation_limit(Some(SubscriptionPlan::Pro)), 1_000);
        assert_eq!(translation_limit(Some(SubscriptionPlan::Enterprise)), 10_000);
        assert_eq!(translation_limit(None), 5);
    }

    #[test]
    fn features_unlock_with_higher_plans() {
        assert!(!plan_features(SubscriptionPlan::Starter).features.family_sharing);
        assert!(plan_features(SubscriptionPlan::Pro).features.priority_support);
        assert!(!plan_features(SubscriptionPlan::Pro).features.custom_domains);
        assert!(plan_features(SubscriptionPlan::Enterprise).features.custom_domains);
    }

    #[test]
    fn quota_denies_exactly_at_the_limit() {
        let mut user = sample_user(SubscriptionPlan::Free);
        for count in 0..5 {
            user.translation_count = count;
            assert!(quota_status(&user).allowed, "count {count} should be allowed");
        }
        user.translation_count = 5;
        let status = quota_status(&user);
        assert!(!status.allowed);
        assert!(status.message().contains("limit of 5"));

        user.translation_count = 9;
        assert!(!quota_status(&user).allowed);
    }

    #[tokio::test]
    async fn record_usage_adds_exactly_one_per_call() {
        let db = Arc::new(InMemoryDatabase::new());
        let mut user = sample_user(SubscriptionPlan::Starter);
        user.translation_count = 7;
        let user_id = db.insert_user(user);
        let ledger = UsageLedger::new(db.clone());

        for _ in 0..3 {
            ledger.record_usage(user_id).await.unwrap();
        }

        let status = ledger.check_quota(user_id).await.unwrap();
        assert_eq!(status.count, 10);
        assert_eq!(status.limit, 100);
    }

    #[tokio::test]
    async fn record_usage_refuses_to_pass_the_limit() {
        let db = Arc::new(InMemoryDatabase::new());
        let mut user = sample_user(SubscriptionPlan::Free);
        user.translation_count = 4;
        let user_id = db.insert_user(user);
        let ledger = UsageLedger::new(db.clone());

        let snapshot = ledger.record_usage(user_id).await.unwrap();
        assert_eq!(snapshot.count, 5);
        assert_eq!(snapshot.remaining(), 0);

        let err = ledger.record_usage(user_id).await.unwrap_err();
        assert!(matches!(err, PortError::QuotaExceeded));
        assert_eq!(db.user(user_id).unwrap().translation_count, 5);
    }

    #[tokio::test]
    async fn overview_combines_quota_plan_and_status() {
        let db = Arc::new(InMemoryDatabase::new());
        let mut user = sample_user(SubscriptionPlan::Pro);
        user.translation_count = 12;
        let user_id = db.insert_user(user);

        let overview = UsageLedger::new(db).overview(user_id).await.unwrap();
        assert_eq!(overview.quota.usage().remaining(), 988);
        assert!(overview.plan.features.family_sharing);
        assert_eq!(overview.subscription_status, Some(SubscriptionStatus::Active));
    }
}
