/// StudyBuddy: centralized constants.
/// Endpoints, timeouts, storage keys and the default plan table live here.
/// Never hardcode these values elsewhere.

// ─── API Endpoints ────────────────────────────────────────────────────────────

pub mod endpoints {
    pub const API_BASE_URL: &str = "https://api.studybuddy.app/v1";
    pub const API_URL_ENV: &str = "STUDYBUDDY_API_URL";

    pub const PLAN_STATUS: &str = "/plan/status";
    pub const GUEST_LIMITS: &str = "/plan/guest-limits";
    pub const CREATE_SUBSCRIPTION: &str = "/subscription/create";
    pub const VERIFY_PAYMENT: &str = "/subscription/verify-payment";
    pub const CANCEL_SUBSCRIPTION: &str = "/subscription/cancel";
}

// ─── Timeouts ─────────────────────────────────────────────────────────────────

pub mod timeouts {
    /// Entitlement and subscription service calls.
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;
    /// The payment sheet waits on a human, so it gets far longer.
    pub const PAYMENT_TIMEOUT_SECS: u64 = 600;
}

// ─── Payment ──────────────────────────────────────────────────────────────────

pub mod payment {
    pub const PROVIDER_KEY_ENV: &str = "STUDYBUDDY_PAYMENT_KEY";
    pub const PRO_PLAN_ID: &str = "pro_monthly";
    /// Minor currency units (paise).
    pub const PRO_AMOUNT: u64 = 19_900;
    pub const CURRENCY: &str = "INR";
}

// ─── Plan Table ───────────────────────────────────────────────────────────────
// Columns: doubts, questions, notes, flashcards per day, then max questions per set.

pub mod plans {
    pub const GUEST_QUOTAS: [u32; 4] = [3, 2, 1, 2];
    pub const GUEST_MAX_QUESTIONS: u32 = 5;

    pub const FREE_QUOTAS: [u32; 4] = [5, 3, 2, 3];
    pub const FREE_MAX_QUESTIONS: u32 = 10;

    pub const PRO_QUOTAS: [u32; 4] = [100, 50, 30, 50];
    pub const PRO_MAX_QUESTIONS: u32 = 30;
}

// ─── Storage ──────────────────────────────────────────────────────────────────

pub mod paths {
    pub const CONFIG_DIR: &str = "studybuddy";
    pub const CONFIG_FILE: &str = "config.toml";
    pub const CREDENTIALS_FILE: &str = "cloud.toml";
    pub const DATA_DIR: &str = "studybuddy";

    pub const GUEST_USAGE_KEY: &str = "guest_usage";
    pub const GUEST_LIMITS_KEY: &str = "guest_limits";
    pub const DEVICE_ID_KEY: &str = "device_id";
    /// Last server-confirmed plan status of the signed-in user.
    pub const PLAN_STATUS_KEY: &str = "plan_status";
}
