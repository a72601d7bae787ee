mod machine;
mod remote;
mod status;

pub use machine::{FetchOutcome, PlanStateMachine};
pub use remote::EntitlementService;
pub use status::{validate_transition, PlanStatus, PlanUsage, SubscriptionStatus, UsageView};
