//! crates/bridge_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Closed string enums
//=========================================================================================

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `Display` and `FromStr` for enums that travel as strings.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Admin,
    Internal,
}
string_enum!(Role, "role", {
    Customer => "customer",
    Admin => "admin",
    Internal => "internal",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}
string_enum!(SubscriptionPlan, "subscription plan", {
    Free => "free",
    Starter => "starter",
    Pro => "pro",
    Enterprise => "enterprise",
});

/// Subscription states as reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Canceled,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}
string_enum!(SubscriptionStatus, "subscription status", {
    Active => "active",
    Trialing => "trialing",
    Canceled => "canceled",
    PastDue => "past_due",
    Incomplete => "incomplete",
    IncompleteExpired => "incomplete_expired",
    Unpaid => "unpaid",
    Paused => "paused",
});

/// Optional classification used to bias summarization emphasis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentDomain {
    School,
    Healthcare,
    Legal,
    Government,
}
string_enum!(DocumentDomain, "document domain", {
    School => "school",
    Healthcare => "healthcare",
    Legal => "legal",
    Government => "government",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Txt,
    Pdf,
}
string_enum!(ExportFormat, "export format", {
    Json => "json",
    Txt => "txt",
    Pdf => "pdf",
});

//=========================================================================================
// Users
//=========================================================================================

/// An account, with its subscription and usage state.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub role: Role,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_status: Option<SubscriptionStatus>,
    pub subscription_start_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub translation_count: u32,
    pub translation_limit: u32,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Admins and internal staff are never gated on subscription state.
    pub fn bypasses_subscription_check(&self) -> bool {
        match self.role {
            Role::Admin | Role::Internal => true,
            Role::Customer => false,
        }
    }

    /// Whether the account may start a new translation, ignoring quota.
    ///
    /// Free-plan accounts are always allowed (their quota is the gate). Paid
    /// plans need an active or trialing subscription, or an unexpired trial.
    pub fn has_translation_access(&self, now: DateTime<Utc>) -> bool {
        if self.bypasses_subscription_check() || self.subscription_plan == SubscriptionPlan::Free {
            return true;
        }
        let subscribed = matches!(
            self.subscription_status,
            Some(SubscriptionStatus::Active) | Some(SubscriptionStatus::Trialing)
        );
        let trial_valid = self.trial_ends_at.is_some_and(|ends| ends > now);
        subscribed || trial_valid
    }
}

/// Fields required to create an account outside the auth provider's own flow.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub subscription_plan: SubscriptionPlan,
    pub translation_limit: u32,
}

/// A point-in-time view of a user's translation usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub count: u32,
    pub limit: u32,
}

impl UsageSnapshot {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

/// Billing fields written when the provider reports a subscription change.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub plan: SubscriptionPlan,
    pub translation_limit: u32,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Documents
//=========================================================================================

/// Represents one uploaded file.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub family_id: Option<Uuid>,
    pub blob_url: String,
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub page_count: Option<u32>,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: Uuid,
    pub blob_url: String,
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
}

/// A document as shown in the owner's listing, joined with its result if any.
#[derive(Debug, Clone)]
pub struct DocumentListing {
    pub document: Document,
    pub detected_language: Option<String>,
    pub confidence: Option<u8>,
}

//=========================================================================================
// Results
//=========================================================================================

/// The plain-language summary produced alongside a translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub purpose: String,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_dates: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub costs: Option<Vec<String>>,
}

/// The translation output for exactly one document.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    pub id: Uuid,
    pub document_id: Uuid,
    pub translation_html: String,
    pub summary: Summary,
    pub detected_language: String,
    pub target_language: String,
    pub domain: Option<DocumentDomain>,
    pub confidence: u8,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A result ready to be persisted, with the account whose usage it consumes.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub translation_html: String,
    pub summary: Summary,
    pub detected_language: String,
    pub target_language: String,
    pub domain: Option<DocumentDomain>,
    pub confidence: u8,
    pub processing_time_ms: u64,
}

//=========================================================================================
// Shares
//=========================================================================================

/// A time-boxed, tokenized public view grant for one document.
#[derive(Debug, Clone)]
pub struct Share {
    pub id: Uuid,
    pub document_id: Uuid,
    pub created_by: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub can_download: bool,
    pub view_count: u32,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Share {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct NewShare {
    pub document_id: Uuid,
    pub created_by: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub can_download: bool,
}

//=========================================================================================
// Outbound email and webhook bookkeeping
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// A webhook event that was acknowledged but could not be processed.
#[derive(Debug, Clone)]
pub struct WebhookFailure {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub error: String,
}
