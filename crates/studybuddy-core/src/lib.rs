pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod feature;
pub mod gate;
pub mod guest;
pub mod identity;
pub mod plan;
pub mod policy;
pub mod remote;
pub mod storage;

// Re-export key types
pub use clock::{DateKey, LocalClock, UsageClock};
pub use config::Settings;
pub use error::{Result, StudyError};
pub use feature::{Difficulty, Feature, FeatureCounts, NoteLength};
pub use gate::{Decision, LimitErrorKind, MeteredRequest, QuotaGate, Reservation, UsagePermit};
pub use guest::{GuestUsage, GuestUsageStore};
pub use identity::Identity;
pub use plan::{
    EntitlementService, FetchOutcome, PlanStateMachine, PlanStatus, PlanUsage,
    SubscriptionStatus, UsageView,
};
pub use policy::{PlanLimits, PlanPolicy, PlanTier};
pub use remote::{guarded, CancelSource, CancelToken};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
