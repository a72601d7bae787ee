//! StudyBuddy backend client.
//!
//! Everything that talks to the StudyBuddy API or the payment provider lives
//! here. The quota logic in `studybuddy-core` only sees the
//! [`EntitlementService`](studybuddy_core::EntitlementService) seam.
//!
//! ## Checkout
//! 1. `create_subscription` registers a trial subscription server-side.
//! 2. `initiate_payment` opens the provider's payment sheet.
//! 3. `verify_payment` hands the signed authorization back to the server.
//!
//! The plan only becomes Pro once step 3 succeeds and the status is refetched.

pub mod auth;
pub mod client;
pub mod flow;
pub mod payment;
pub mod subscription;

pub use auth::CloudCredentials;
pub use client::CloudClient;
pub use flow::{CancelOutcome, CheckoutConfig, SagaStage, SubscribeOutcome, SubscriptionFlow};
pub use payment::{CheckoutOptions, PaymentGateway, PaymentRejection, Prefill};
pub use subscription::{PaymentAuthorization, SubscriptionData, SubscriptionService, UserData};
