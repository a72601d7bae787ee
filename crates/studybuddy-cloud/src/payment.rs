//! The payment provider seam.
//!
//! The provider's checkout UI is an opaque collaborator: it is given the
//! subscription to pay for and either returns a signed authorization or a
//! rejection. Nothing is captured on rejection.

use crate::subscription::{PaymentAuthorization, UserData};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefill {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl From<&UserData> for Prefill {
    fn from(user: &UserData) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
        }
    }
}

/// Everything the payment sheet needs to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOptions {
    /// Public key of the merchant account.
    pub provider_key: String,
    pub provider_subscription_id: String,
    /// Smallest currency unit.
    pub amount: u64,
    pub currency: String,
    pub description: String,
    pub prefill: Prefill,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentRejection {
    #[error("payment cancelled by user")]
    Dismissed,

    #[error("payment provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Show the payment sheet and wait for the user to finish with it.
    async fn open(&self, options: CheckoutOptions) -> Result<PaymentAuthorization, PaymentRejection>;
}
