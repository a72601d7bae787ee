//! Checkout and cancellation, run as a saga.
//!
//! ```text
//!   Idle ──create──▶ Created ──pay──▶ Paying ──▶ Authorized ──verify──▶ Verified
//!                      ▲                │                       │
//!                      └── rejected ────┘                       └─ failed ─▶ NeedsSupport
//! ```
//!
//! A rejected payment captured nothing, so the saga returns to `Created` and a
//! fresh attempt is allowed. Only one payment sheet can be open, and only for
//! the subscription awaiting payment. Once the provider has authorized a
//! payment, any failure to verify it is terminal for this flow: the user is
//! sent to support with the payment id instead of being offered a retry.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use studybuddy_core::{
    guarded, CancelToken, FetchOutcome, PlanStateMachine, Result, Settings, StudyError,
    SubscriptionStatus,
};

use crate::payment::{CheckoutOptions, PaymentGateway, Prefill};
use crate::subscription::{PaymentAuthorization, SubscriptionData, SubscriptionService, UserData};

/// Merchant side of the payment sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub provider_key: String,
    pub amount: u64,
    pub currency: String,
    pub description: String,
}

impl CheckoutConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider_key = settings.provider_key().ok_or_else(|| {
            StudyError::Config(format!(
                "payment provider key missing; set {}",
                settings.payment.provider_key_env
            ))
        })?;
        Ok(Self {
            provider_key,
            amount: settings.payment.amount,
            currency: settings.payment.currency.clone(),
            description: "StudyBuddy Pro".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SagaStage {
    #[default]
    Idle,
    Created {
        subscription: SubscriptionData,
    },
    /// The payment sheet is open.
    Paying {
        subscription: SubscriptionData,
    },
    Authorized {
        subscription: SubscriptionData,
        payment: PaymentAuthorization,
    },
    Verified {
        subscription_id: String,
    },
    NeedsSupport {
        payment_id: String,
        provider_subscription_id: String,
    },
}

impl SagaStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Created { .. } => "created",
            Self::Paying { .. } => "paying",
            Self::Authorized { .. } => "authorized",
            Self::Verified { .. } => "verified",
            Self::NeedsSupport { .. } => "awaiting support",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub subscription: SubscriptionData,
    pub payment_id: String,
    /// False when the payment verified but the follow-up status fetch did not land.
    pub status_refreshed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub status_refreshed: bool,
    pub status: Option<SubscriptionStatus>,
}

pub struct SubscriptionFlow {
    service: Arc<dyn SubscriptionService>,
    gateway: Arc<dyn PaymentGateway>,
    plan: Arc<PlanStateMachine>,
    checkout: CheckoutConfig,
    request_timeout: Duration,
    payment_timeout: Duration,
    stage: Mutex<SagaStage>,
}

impl SubscriptionFlow {
    pub fn new(
        service: Arc<dyn SubscriptionService>,
        gateway: Arc<dyn PaymentGateway>,
        plan: Arc<PlanStateMachine>,
        checkout: CheckoutConfig,
    ) -> Self {
        let defaults = Settings::default();
        Self {
            service,
            gateway,
            plan,
            checkout,
            request_timeout: defaults.request_timeout(),
            payment_timeout: defaults.payment_timeout(),
            stage: Mutex::new(SagaStage::Idle),
        }
    }

    pub fn with_timeouts(mut self, request: Duration, payment: Duration) -> Self {
        self.request_timeout = request;
        self.payment_timeout = payment;
        self
    }

    fn lock_stage(&self) -> MutexGuard<'_, SagaStage> {
        self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_stage(&self, stage: SagaStage) {
        *self.lock_stage() = stage;
    }

    pub fn stage(&self) -> SagaStage {
        self.lock_stage().clone()
    }

    /// Leave `NeedsSupport` once support has reconciled the payment.
    pub fn acknowledge_support(&self) {
        let mut stage = self.lock_stage();
        if let SagaStage::NeedsSupport { payment_id, .. } = &*stage {
            tracing::info!("Support case for payment {} acknowledged", payment_id);
        }
        *stage = SagaStage::Idle;
    }

    fn blocked_by_support(&self) -> Result<()> {
        match &*self.lock_stage() {
            SagaStage::NeedsSupport {
                payment_id,
                provider_subscription_id,
            } => Err(StudyError::PaymentCapturedNotVerified {
                payment_id: payment_id.clone(),
                provider_subscription_id: provider_subscription_id.clone(),
                message: "an earlier payment is still awaiting verification".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Register a subscription server-side. No local state changes on failure.
    pub async fn create_subscription(
        &self,
        user: &UserData,
        cancel: &CancelToken,
    ) -> Result<SubscriptionData> {
        user.validate()?;
        self.blocked_by_support()?;

        let subscription = guarded(
            "create subscription",
            self.request_timeout,
            cancel,
            self.service.create_subscription(user),
        )
        .await?;

        tracing::info!(
            "Created subscription {} (provider {}), status {}",
            subscription.subscription_id,
            subscription.provider_subscription_id,
            subscription.status
        );
        self.set_stage(SagaStage::Created {
            subscription: subscription.clone(),
        });
        Ok(subscription)
    }

    /// Open the payment sheet for `subscription`.
    ///
    /// Only valid while the saga sits at `Created` for that same
    /// subscription. Dismissal and provider errors become `PaymentFailed`;
    /// nothing was captured and the subscription can be paid for again.
    pub async fn initiate_payment(
        &self,
        subscription: &SubscriptionData,
        user: &UserData,
        cancel: &CancelToken,
    ) -> Result<PaymentAuthorization> {
        self.blocked_by_support()?;
        {
            let mut stage = self.lock_stage();
            match &*stage {
                SagaStage::Created { subscription: created }
                    if created.provider_subscription_id
                        == subscription.provider_subscription_id => {}
                SagaStage::Created { subscription: created } => {
                    return Err(StudyError::InvalidTransition(format!(
                        "subscription {} is not the one awaiting payment ({})",
                        subscription.provider_subscription_id, created.provider_subscription_id
                    )));
                }
                other => {
                    return Err(StudyError::InvalidTransition(format!(
                        "cannot open payment while checkout is {}",
                        other.label()
                    )));
                }
            }
            *stage = SagaStage::Paying {
                subscription: subscription.clone(),
            };
        }

        let options = CheckoutOptions {
            provider_key: self.checkout.provider_key.clone(),
            provider_subscription_id: subscription.provider_subscription_id.clone(),
            amount: self.checkout.amount,
            currency: self.checkout.currency.clone(),
            description: self.checkout.description.clone(),
            prefill: Prefill::from(user),
        };

        let opened = guarded("payment", self.payment_timeout, cancel, async {
            self.gateway.open(options).await.map_err(|rejection| {
                tracing::info!(
                    "Payment for {} not completed: {}",
                    subscription.provider_subscription_id,
                    rejection
                );
                StudyError::PaymentFailed(rejection.to_string())
            })
        })
        .await;

        let payment = match opened {
            Ok(payment) => payment,
            Err(e) => {
                self.set_stage(SagaStage::Created {
                    subscription: subscription.clone(),
                });
                return Err(e);
            }
        };

        tracing::info!(
            "Payment {} authorized for {}",
            payment.payment_id,
            payment.provider_subscription_id
        );
        self.set_stage(SagaStage::Authorized {
            subscription: subscription.clone(),
            payment: payment.clone(),
        });
        Ok(payment)
    }

    /// Confirm an authorized payment with the server, then refetch the plan.
    ///
    /// Returns whether the refetch landed. Any verification failure, timeout
    /// included, is `PaymentCapturedNotVerified`.
    pub async fn verify_payment(
        &self,
        payment: &PaymentAuthorization,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let verified = guarded(
            "verify payment",
            self.request_timeout,
            cancel,
            self.service.verify_payment(payment),
        )
        .await;

        if let Err(e) = verified {
            tracing::error!(
                "Payment {} for {} captured but not verified: {}",
                payment.payment_id,
                payment.provider_subscription_id,
                e
            );
            self.set_stage(SagaStage::NeedsSupport {
                payment_id: payment.payment_id.clone(),
                provider_subscription_id: payment.provider_subscription_id.clone(),
            });
            return Err(StudyError::PaymentCapturedNotVerified {
                payment_id: payment.payment_id.clone(),
                provider_subscription_id: payment.provider_subscription_id.clone(),
                message: e.to_string(),
            });
        }

        let subscription_id = match &*self.lock_stage() {
            SagaStage::Authorized { subscription, .. } => subscription.subscription_id.clone(),
            _ => payment.provider_subscription_id.clone(),
        };
        tracing::info!("Payment {} verified", payment.payment_id);
        self.set_stage(SagaStage::Verified { subscription_id });

        Ok(self.refresh_plan(cancel).await)
    }

    /// Create, pay, verify.
    pub async fn subscribe(&self, user: &UserData, cancel: &CancelToken) -> Result<SubscribeOutcome> {
        let subscription = self.create_subscription(user, cancel).await?;
        let payment = self.initiate_payment(&subscription, user, cancel).await?;
        let status_refreshed = self.verify_payment(&payment, cancel).await?;
        Ok(SubscribeOutcome {
            subscription,
            payment_id: payment.payment_id,
            status_refreshed,
        })
    }

    /// Cancel the current subscription. The cached status is only changed by
    /// the refetch after the server accepts.
    pub async fn cancel_subscription(
        &self,
        reason: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<CancelOutcome> {
        self.plan.ensure_cancellable()?;

        guarded(
            "cancel subscription",
            self.request_timeout,
            cancel,
            self.service.cancel_subscription(reason),
        )
        .await?;

        tracing::info!("Subscription cancellation accepted");
        let status_refreshed = self.refresh_plan(cancel).await;
        Ok(CancelOutcome {
            status_refreshed,
            status: self.plan.subscription_status(),
        })
    }

    async fn refresh_plan(&self, cancel: &CancelToken) -> bool {
        match self.plan.refresh_status_with(cancel).await {
            Ok(FetchOutcome::Updated) => true,
            Ok(outcome) => {
                tracing::debug!("Plan refresh after subscription change: {:?}", outcome);
                false
            }
            Err(e) => {
                tracing::warn!("Plan refresh after subscription change failed: {}", e);
                false
            }
        }
    }
}
