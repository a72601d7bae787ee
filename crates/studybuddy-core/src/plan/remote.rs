use crate::error::StudyError;
use crate::plan::status::PlanStatus;
use crate::policy::PlanLimits;

/// The remote entitlement service. Usage increments are implicit: the server
/// counts them as a side effect of the generation endpoints.
#[async_trait::async_trait]
pub trait EntitlementService: Send + Sync {
    /// Current plan status of the signed-in user.
    async fn plan_status(&self) -> Result<PlanStatus, StudyError>;

    /// Server-issued limits for anonymous guests.
    async fn guest_limits(&self) -> Result<PlanLimits, StudyError>;
}
