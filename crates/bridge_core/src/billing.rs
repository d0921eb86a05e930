//! crates/bridge_core/src/billing.rs
//!
//! Opens subscription checkouts, applies billing provider events to accounts
//! and sends the related emails. Signature checks and wire parsing happen in
//! the web layer; this module sees already-decoded events.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use crate::domain::{
    EmailMessage, NewUser, Role, SubscriptionPlan, SubscriptionStatus, SubscriptionUpdate, User,
    WebhookFailure,
};
use crate::ports::{
    CheckoutProvider, CheckoutRequest, CheckoutSession, DatabaseService, EmailService, PortError,
};
use crate::usage::{translation_limit, UPGRADE_URL};

pub const BILLING_PROVIDER: &str = "stripe";

/// Configured price ids for each paid plan.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    pub starter: Option<String>,
    pub pro: Option<String>,
    pub enterprise: Option<String>,
}

impl PriceTable {
    /// Exact id match first, then the plan name inside the id, else starter.
    pub fn plan_for(&self, price_id: Option<&str>) -> SubscriptionPlan {
        let Some(price_id) = price_id else {
            return SubscriptionPlan::Starter;
        };
        let configured = [
            (&self.enterprise, SubscriptionPlan::Enterprise),
            (&self.pro, SubscriptionPlan::Pro),
            (&self.starter, SubscriptionPlan::Starter),
        ];
        if let Some((_, plan)) = configured
            .iter()
            .find(|(id, _)| id.as_deref() == Some(price_id))
        {
            return *plan;
        }
        if price_id.contains("enterprise") {
            SubscriptionPlan::Enterprise
        } else if price_id.contains("pro") {
            SubscriptionPlan::Pro
        } else {
            SubscriptionPlan::Starter
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub customer_id: String,
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        email: Option<String>,
        customer_id: String,
        subscription_id: Option<String>,
    },
    SubscriptionChanged(SubscriptionChange),
    SubscriptionDeleted {
        customer_id: String,
    },
    PaymentFailed {
        customer_id: String,
    },
    /// Acknowledged without processing.
    Other,
}

/// One verified webhook delivery. `event` is `Err` when the payload could
/// not be decoded into a known event shape.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub event: Result<BillingEvent, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("checkout session carries no customer email")]
    MissingEmail,
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error(transparent)]
    Port(#[from] PortError),
}

//=========================================================================================
// Checkout
//=========================================================================================

/// Free days before the first charge on a new subscription.
pub const TRIAL_PERIOD_DAYS: u32 = 14;

/// The provider substitutes the real session id for this placeholder.
pub const CHECKOUT_SESSION_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Email is required")]
    MissingEmail,
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("No price is configured for checkout")]
    PriceNotConfigured,
    #[error("Failed to create checkout session: {0}")]
    Provider(#[from] PortError),
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"))
}

/// Opens hosted checkouts for new subscribers. The account itself is created
/// later, when the provider reports the completed checkout.
#[derive(Clone)]
pub struct CheckoutService {
    provider: Arc<dyn CheckoutProvider>,
    prices: PriceTable,
    app_url: String,
}

impl CheckoutService {
    pub fn new(
        provider: Arc<dyn CheckoutProvider>,
        prices: PriceTable,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            prices,
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Starts a subscription checkout with a trial. Without a `price_id` the
    /// Starter price is used.
    pub async fn start_checkout(
        &self,
        email: &str,
        price_id: Option<&str>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(CheckoutError::MissingEmail);
        }
        if !email_pattern().is_match(email) {
            return Err(CheckoutError::InvalidEmail);
        }
        let price_id = price_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or(self.prices.starter.as_deref())
            .ok_or(CheckoutError::PriceNotConfigured)?;

        let request = CheckoutRequest {
            customer_email: email.to_string(),
            price_id: price_id.to_string(),
            trial_period_days: TRIAL_PERIOD_DAYS,
            success_url: format!(
                "{}/auth/setup?session_id={}",
                self.app_url, CHECKOUT_SESSION_PLACEHOLDER
            ),
            cancel_url: format!("{}/?checkout=cancelled", self.app_url),
        };
        let session = self
            .provider
            .create_checkout_session(&request)
            .await
            .map_err(|e| {
                error!(%price_id, "Checkout session creation failed: {}", e);
                CheckoutError::Provider(e)
            })?;
        info!(session_id = %session.id, %price_id, "Created checkout session");
        Ok(session)
    }
}

//=========================================================================================
// Emails
//=========================================================================================

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn welcome_email(to: &str, app_url: &str) -> EmailMessage {
    let app_url = app_url.trim_end_matches('/');
    EmailMessage {
        to: to.to_string(),
        subject: "Welcome to Bridge".to_string(),
        html: format!(
            "<h1>Welcome to Bridge!</h1>\
             <p>Thank you for subscribing. Your payment was successful and your subscription is being activated.</p>\
             <p><a href=\"{app_url}/login\">Sign in to start translating documents</a></p>\
             <p>- The Bridge Team</p>"
        ),
    }
}

pub fn payment_failed_email(user: &User, app_url: &str) -> EmailMessage {
    let app_url = app_url.trim_end_matches('/');
    EmailMessage {
        to: user.email.clone(),
        subject: "Bridge Payment Failed - Action Required".to_string(),
        html: format!(
            "<p>Hi {name},</p>\
             <p>We were unable to process your payment for your {plan} plan.</p>\
             <p>Please update your payment method to continue using Bridge:</p>\
             <p><a href=\"{app_url}{UPGRADE_URL}\">Update Payment Method</a></p>\
             <p>- The Bridge Team</p>",
            name = user.name,
            plan = capitalize(user.subscription_plan.as_str()),
        ),
    }
}

//=========================================================================================
// Processor
//=========================================================================================

#[derive(Clone)]
pub struct BillingWebhookProcessor {
    db: Arc<dyn DatabaseService>,
    email: Arc<dyn EmailService>,
    prices: PriceTable,
    app_url: String,
}

impl BillingWebhookProcessor {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        email: Arc<dyn EmailService>,
        prices: PriceTable,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            email,
            prices,
            app_url: app_url.into(),
        }
    }

    /// Processes a verified delivery. Never fails: a delivery that cannot be
    /// applied is written to the dead-letter table instead.
    pub async fn handle(&self, delivery: WebhookDelivery) {
        let outcome = match &delivery.event {
            Ok(event) => self.apply(event).await,
            Err(reason) => Err(BillingError::Malformed(reason.clone())),
        };

        if let Err(e) = outcome {
            error!(
                event_id = %delivery.event_id,
                event_type = %delivery.event_type,
                "Billing webhook processing failed: {}", e
            );
            let failure = WebhookFailure {
                provider: BILLING_PROVIDER.to_string(),
                event_id: delivery.event_id,
                event_type: delivery.event_type,
                payload: delivery.payload,
                error: e.to_string(),
            };
            if let Err(e) = self.db.record_webhook_failure(failure).await {
                error!("Failed to record webhook failure: {}", e);
            }
        }
    }

    pub async fn apply(&self, event: &BillingEvent) -> Result<(), BillingError> {
        match event {
            BillingEvent::CheckoutCompleted {
                email,
                customer_id,
                subscription_id,
            } => {
                let email = email.as_deref().ok_or(BillingError::MissingEmail)?;
                self.checkout_completed(email, customer_id, subscription_id.as_deref())
                    .await
            }
            BillingEvent::SubscriptionChanged(change) => self.subscription_changed(change).await,
            BillingEvent::SubscriptionDeleted { customer_id } => {
                self.db
                    .set_subscription_status(customer_id, SubscriptionStatus::Canceled)
                    .await?;
                info!(%customer_id, "Subscription canceled");
                Ok(())
            }
            BillingEvent::PaymentFailed { customer_id } => {
                let user = self.db.get_user_by_customer_id(customer_id).await?;
                warn!(user_id = %user.id, %customer_id, "Payment failed");
                self.send_quietly(payment_failed_email(&user, &self.app_url))
                    .await;
                Ok(())
            }
            BillingEvent::Other => Ok(()),
        }
    }

    async fn checkout_completed(
        &self,
        email: &str,
        customer_id: &str,
        subscription_id: Option<&str>,
    ) -> Result<(), BillingError> {
        let user = match self.db.get_user_by_email(email).await {
            Ok(user) => user,
            Err(PortError::NotFound(_)) => self.create_customer(email).await?,
            Err(e) => return Err(e.into()),
        };

        self.db
            .link_billing_customer(user.id, customer_id, subscription_id)
            .await?;
        info!(user_id = %user.id, %customer_id, "Checkout completed");

        self.send_quietly(welcome_email(email, &self.app_url)).await;
        Ok(())
    }

    async fn create_customer(&self, email: &str) -> Result<User, BillingError> {
        let name = email.split('@').next().unwrap_or(email).to_string();
        let new_user = NewUser {
            email: email.to_string(),
            name,
            role: Role::Customer,
            subscription_plan: SubscriptionPlan::Free,
            translation_limit: translation_limit(Some(SubscriptionPlan::Free)),
        };
        match self.db.create_user(new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "Created account from checkout");
                Ok(user)
            }
            // Another delivery created the account first.
            Err(PortError::Conflict(_)) => Ok(self.db.get_user_by_email(email).await?),
            Err(e) => Err(e.into()),
        }
    }

    async fn subscription_changed(&self, change: &SubscriptionChange) -> Result<(), BillingError> {
        let plan = self.prices.plan_for(change.price_id.as_deref());
        let update = SubscriptionUpdate {
            subscription_id: change.subscription_id.clone(),
            status: change.status,
            plan,
            translation_limit: translation_limit(Some(plan)),
            period_start: change.period_start,
            period_end: change.period_end,
            trial_ends_at: change.trial_end,
        };
        let user = self
            .db
            .apply_subscription_update(&change.customer_id, &update)
            .await?;
        info!(
            user_id = %user.id,
            plan = %plan,
            status = %change.status,
            "Subscription updated"
        );
        Ok(())
    }

    async fn send_quietly(&self, message: EmailMessage) {
        if let Err(e) = self.email.send(&message).await {
            warn!(to = %message.to, "Failed to send '{}': {}", message.subject, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_user, InMemoryDatabase, RecordingCheckout, RecordingMailer};
    use chrono::Duration;

    fn prices() -> PriceTable {
        PriceTable {
            starter: Some("price_1AbcStarter".into()),
            pro: Some("price_1XyzMonthly".into()),
            enterprise: None,
        }
    }

    fn processor(mailer: RecordingMailer) -> (BillingWebhookProcessor, Arc<InMemoryDatabase>, Arc<RecordingMailer>) {
        let db = Arc::new(InMemoryDatabase::new());
        let mailer = Arc::new(mailer);
        let processor =
            BillingWebhookProcessor::new(db.clone(), mailer.clone(), prices(), "https://bridge.test");
        (processor, db, mailer)
    }

    fn delivery(event: Result<BillingEvent, String>) -> WebhookDelivery {
        WebhookDelivery {
            event_id: "evt_1".into(),
            event_type: "customer.subscription.updated".into(),
            payload: "{}".into(),
            event,
        }
    }

    fn linked_user(db: &InMemoryDatabase, customer_id: &str) -> uuid::Uuid {
        let user_id = db.insert_user(sample_user(SubscriptionPlan::Free));
        let mut user = db.user(user_id).unwrap();
        user.stripe_customer_id = Some(customer_id.into());
        db.insert_user(user)
    }

    #[test]
    fn configured_price_ids_win_over_name_matching() {
        let table = prices();
        assert_eq!(table.plan_for(Some("price_1XyzMonthly")), SubscriptionPlan::Pro);
        assert_eq!(table.plan_for(Some("price_enterprise_yearly")), SubscriptionPlan::Enterprise);
        assert_eq!(table.plan_for(Some("price_pro_yearly")), SubscriptionPlan::Pro);
        assert_eq!(table.plan_for(Some("price_unknown")), SubscriptionPlan::Starter);
        assert_eq!(table.plan_for(None), SubscriptionPlan::Starter);
    }

    #[tokio::test]
    async fn checkout_creates_a_free_account_and_welcomes_it() {
        let (processor, db, mailer) = processor(RecordingMailer::new());
        processor
            .apply(&BillingEvent::CheckoutCompleted {
                email: Some("new.parent@example.com".into()),
                customer_id: "cus_1".into(),
                subscription_id: Some("sub_1".into()),
            })
            .await
            .unwrap();

        let user = db.get_user_by_customer_id("cus_1").await.unwrap();
        assert_eq!(user.email, "new.parent@example.com");
        assert_eq!(user.name, "new.parent");
        assert_eq!(user.subscription_plan, SubscriptionPlan::Free);
        assert_eq!(user.stripe_subscription_id.as_deref(), Some("sub_1"));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "new.parent@example.com");
        assert!(sent[0].html.contains("https://bridge.test/login"));
    }

    #[tokio::test]
    async fn checkout_links_an_existing_account_even_if_email_fails() {
        let (processor, db, _mailer) = processor(RecordingMailer::failing());
        let user_id = db.insert_user(sample_user(SubscriptionPlan::Free));
        let email = db.user(user_id).unwrap().email;

        processor
            .apply(&BillingEvent::CheckoutCompleted {
                email: Some(email),
                customer_id: "cus_2".into(),
                subscription_id: None,
            })
            .await
            .unwrap();

        assert_eq!(db.user(user_id).unwrap().stripe_customer_id.as_deref(), Some("cus_2"));
    }

    #[tokio::test]
    async fn subscription_change_sets_plan_and_resets_limit() {
        let (processor, db, _mailer) = processor(RecordingMailer::new());
        let user_id = linked_user(&db, "cus_3");
        let trial_end = Utc::now() + Duration::days(14);

        processor
            .apply(&BillingEvent::SubscriptionChanged(SubscriptionChange {
                customer_id: "cus_3".into(),
                subscription_id: "sub_3".into(),
                status: SubscriptionStatus::Trialing,
                price_id: Some("price_1XyzMonthly".into()),
                period_start: None,
                period_end: None,
                trial_end: Some(trial_end),
            }))
            .await
            .unwrap();

        let user = db.user(user_id).unwrap();
        assert_eq!(user.subscription_plan, SubscriptionPlan::Pro);
        assert_eq!(user.translation_limit, 1_000);
        assert_eq!(user.subscription_status, Some(SubscriptionStatus::Trialing));
        assert_eq!(user.trial_ends_at, Some(trial_end));
    }

    #[tokio::test]
    async fn deletion_marks_the_subscription_canceled() {
        let (processor, db, _mailer) = processor(RecordingMailer::new());
        let user_id = linked_user(&db, "cus_4");

        processor
            .apply(&BillingEvent::SubscriptionDeleted {
                customer_id: "cus_4".into(),
            })
            .await
            .unwrap();

        assert_eq!(
            db.user(user_id).unwrap().subscription_status,
            Some(SubscriptionStatus::Canceled)
        );
    }

    #[tokio::test]
    async fn payment_failure_emails_the_account_holder() {
        let (processor, db, mailer) = processor(RecordingMailer::new());
        let user_id = linked_user(&db, "cus_5");

        processor
            .apply(&BillingEvent::PaymentFailed {
                customer_id: "cus_5".into(),
            })
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, db.user(user_id).unwrap().email);
        assert!(sent[0].html.contains("https://bridge.test/settings/billing"));
    }

    #[tokio::test]
    async fn unprocessable_deliveries_are_dead_lettered() {
        let (processor, db, _mailer) = processor(RecordingMailer::new());

        processor
            .handle(delivery(Ok(BillingEvent::SubscriptionDeleted {
                customer_id: "cus_unknown".into(),
            })))
            .await;
        processor
            .handle(delivery(Err("missing field `customer`".into())))
            .await;
        processor.handle(delivery(Ok(BillingEvent::Other))).await;

        let failures = db.webhook_failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].provider, "stripe");
        assert_eq!(failures[0].event_id, "evt_1");
        assert!(failures[1].error.contains("missing field"));
    }

    fn checkout(provider: RecordingCheckout) -> (CheckoutService, Arc<RecordingCheckout>) {
        let provider = Arc::new(provider);
        let service = CheckoutService::new(provider.clone(), prices(), "https://bridge.test/");
        (service, provider)
    }

    #[tokio::test]
    async fn checkout_defaults_to_the_starter_price_with_a_trial() {
        let (service, provider) = checkout(RecordingCheckout::new());

        let session = service
            .start_checkout(" parent@example.com ", None)
            .await
            .unwrap();

        assert_eq!(session.id, "cs_test_1");
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].customer_email, "parent@example.com");
        assert_eq!(requests[0].price_id, "price_1AbcStarter");
        assert_eq!(requests[0].trial_period_days, 14);
        assert_eq!(
            requests[0].success_url,
            "https://bridge.test/auth/setup?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(requests[0].cancel_url, "https://bridge.test/?checkout=cancelled");
    }

    #[tokio::test]
    async fn checkout_uses_an_explicit_price() {
        let (service, provider) = checkout(RecordingCheckout::new());
        service
            .start_checkout("parent@example.com", Some("price_1XyzMonthly"))
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].price_id, "price_1XyzMonthly");
    }

    #[tokio::test]
    async fn checkout_rejects_bad_emails_before_calling_the_provider() {
        let (service, provider) = checkout(RecordingCheckout::new());

        let cases = [
            ("  ", "Email is required"),
            ("parent@example", "Invalid email format"),
            ("a b@c.d", "Invalid email format"),
        ];
        for (email, expected) in cases {
            let err = service.start_checkout(email, None).await.unwrap_err();
            assert_eq!(err.to_string(), expected, "{email}");
        }
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn checkout_without_any_price_is_a_configuration_error() {
        let provider = Arc::new(RecordingCheckout::new());
        let service =
            CheckoutService::new(provider.clone(), PriceTable::default(), "https://bridge.test");

        let err = service.start_checkout("parent@example.com", None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::PriceNotConfigured));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn provider_failures_surface_as_checkout_errors() {
        let (service, _provider) = checkout(RecordingCheckout::failing());
        let err = service.start_checkout("parent@example.com", None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Provider(PortError::Unexpected(_))));
    }
}
