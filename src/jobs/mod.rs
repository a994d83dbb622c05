// Reconciliation jobs and their scheduling
pub mod iap_reconciliation;
pub mod membership_reconciliation;
pub mod scheduler;

use std::future::Future;

use time::OffsetDateTime;

use crate::models::entitlement::RunSummary;

pub use iap_reconciliation::IapReconciliationJob;
pub use membership_reconciliation::MembershipReconciliationJob;
pub use scheduler::{DailyScheduler, ImmediateScheduler, Scheduler};

/// A reconciliation sweep. `run` always completes: per-item failures are
/// counted in the summary, never returned.
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, now: OffsetDateTime) -> impl Future<Output = RunSummary> + Send;
}

/// The daily run: purchases first, then memberships
pub struct NightlyReconciliation<V> {
    pub iap: IapReconciliationJob<V>,
    pub membership: MembershipReconciliationJob,
}

impl<V: crate::services::ReceiptVerifier> Job for NightlyReconciliation<V> {
    fn name(&self) -> &'static str {
        "nightly_reconciliation"
    }

    async fn run(&self, now: OffsetDateTime) -> RunSummary {
        let mut summary = RunSummary::start(self.name(), now);
        summary.merge(&self.iap.run(now).await);
        summary.merge(&self.membership.run(now).await);
        summary.finish()
    }
}
