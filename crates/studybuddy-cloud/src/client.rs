use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use studybuddy_core::constants::endpoints;
use studybuddy_core::{EntitlementService, PlanLimits, PlanStatus, Settings, StudyError};

use crate::auth::CloudCredentials;
use crate::subscription::{
    CancelRequest, PaymentAuthorization, SubscriptionData, SubscriptionService, UserData,
};

type Result<T> = std::result::Result<T, StudyError>;

/// HTTP client for the StudyBuddy API.
///
/// Requests carry a hard timeout from [`Settings`]; callers wrap them in
/// [`guarded`](studybuddy_core::guarded) for cancellation as well.
#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl CloudClient {
    pub fn new(settings: &Settings, creds: &CloudCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: settings.api_base_url(),
            token: creds.api_token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token.as_ref().ok_or(StudyError::NotSignedIn)?;
        Ok(request.bearer_auth(token))
    }

    async fn check(label: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("{} failed ({}): {}", label, status, text);
            return Err(StudyError::server(format!(
                "{} failed ({}): {}",
                label, status, text
            )));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(label: &str, request: RequestBuilder) -> Result<T> {
        let response = Self::check(label, request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            StudyError::server(format!("{} returned an unreadable body: {}", label, e))
        })
    }

    async fn send_empty(label: &str, request: RequestBuilder) -> Result<()> {
        Self::check(label, request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl EntitlementService for CloudClient {
    async fn plan_status(&self) -> Result<PlanStatus> {
        let request = self.authed(self.http.get(self.url(endpoints::PLAN_STATUS)))?;
        Self::send_json("Plan status", request).await
    }

    async fn guest_limits(&self) -> Result<PlanLimits> {
        // Public endpoint; guests have no token.
        let request = self.http.get(self.url(endpoints::GUEST_LIMITS));
        Self::send_json("Guest limits", request).await
    }
}

#[async_trait]
impl SubscriptionService for CloudClient {
    async fn create_subscription(&self, user: &UserData) -> Result<SubscriptionData> {
        let request = self
            .authed(self.http.post(self.url(endpoints::CREATE_SUBSCRIPTION)))?
            .json(user);
        Self::send_json("Create subscription", request).await
    }

    async fn verify_payment(&self, payment: &PaymentAuthorization) -> Result<()> {
        let request = self
            .authed(self.http.post(self.url(endpoints::VERIFY_PAYMENT)))?
            .json(payment);
        Self::send_empty("Verify payment", request).await
    }

    async fn cancel_subscription(&self, reason: Option<&str>) -> Result<()> {
        let request = self
            .authed(self.http.post(self.url(endpoints::CANCEL_SUBSCRIPTION)))?
            .json(&CancelRequest { reason });
        Self::send_empty("Cancel subscription", request).await
    }
}
