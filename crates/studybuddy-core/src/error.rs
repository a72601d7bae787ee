use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    /// Malformed request parameters. Always a local bug, never a quota issue.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entitlement or subscription service unreachable, erroring or timed out.
    #[error("Server error: {0}")]
    Server(String),

    /// The payment sheet was dismissed or the provider rejected the payment.
    /// Nothing was captured, the flow can be retried.
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// The provider authorized the payment but the server never confirmed it.
    /// Retrying would reuse stale payment data or risk a double charge.
    #[error(
        "Payment {payment_id} captured but not verified for subscription {provider_subscription_id}: {message}"
    )]
    PaymentCapturedNotVerified {
        payment_id: String,
        provider_subscription_id: String,
        message: String,
    },

    #[error("Invalid subscription transition: {0}")]
    InvalidTransition(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl StudyError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable error code shown to callers and written to logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Server(_) | Self::Http(_) => "SERVER_ERROR",
            Self::PaymentFailed(_) => "PAYMENT_FAILED",
            Self::PaymentCapturedNotVerified { .. } => "PAYMENT_CAPTURED_NOT_VERIFIED",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::NotSignedIn => "NOT_SIGNED_IN",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether showing a "try again" affordance makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Server(_) | Self::Http(_) | Self::PaymentFailed(_) | Self::Cancelled
        )
    }

    /// The only error that must send the user to support instead of a retry.
    pub fn needs_support(&self) -> bool {
        matches!(self, Self::PaymentCapturedNotVerified { .. })
    }
}

pub type Result<T> = std::result::Result<T, StudyError>;
