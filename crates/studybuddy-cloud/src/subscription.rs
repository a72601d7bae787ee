use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use studybuddy_core::{StudyError, SubscriptionStatus};

/// Who is subscribing. Also used to prefill the payment sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub plan_id: String,
}

impl UserData {
    pub fn new(name: impl Into<String>, email: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
            plan_id: plan_id.into(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn validate(&self) -> Result<(), StudyError> {
        if self.name.trim().is_empty() {
            return Err(StudyError::validation("name is required"));
        }
        if !self.email.contains('@') {
            return Err(StudyError::validation(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        if self.plan_id.trim().is_empty() {
            return Err(StudyError::validation("plan id is required"));
        }
        Ok(())
    }
}

/// The server's record of a freshly created subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionData {
    pub subscription_id: String,
    /// The payment provider's id; the payment sheet is opened against this.
    pub provider_subscription_id: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

/// What the payment provider hands back after a successful authorization.
/// Sent unchanged to the verify endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub payment_id: String,
    pub provider_subscription_id: String,
    pub signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancelRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
}

/// Subscription endpoints of the backend.
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    async fn create_subscription(&self, user: &UserData) -> Result<SubscriptionData, StudyError>;

    async fn verify_payment(&self, payment: &PaymentAuthorization) -> Result<(), StudyError>;

    async fn cancel_subscription(&self, reason: Option<&str>) -> Result<(), StudyError>;
}
