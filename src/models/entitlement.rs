use serde::Deserialize;
use std::time::Instant;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

/// Point/AI point pair granted by a product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardGrant {
    pub point: i32,
    pub ai_point: i32,
}

/// Operator request to grant an entitlement without a receipt
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminGrantRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub product_id: String,
    #[validate(length(min = 1, max = 255))]
    pub transaction_id: String,
}

/// Outcome of a single sweep, logged on completion
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job: &'static str,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub examined: usize,
    pub expired: usize,
    pub renewed: usize,
    pub skipped: usize,
    /// Validator could not decide; nothing was changed
    pub inconclusive: usize,
    pub failed: usize,
    timer: Instant,
}

impl RunSummary {
    pub fn start(job: &'static str, now: OffsetDateTime) -> Self {
        Self {
            job,
            started_at: now,
            finished_at: None,
            examined: 0,
            expired: 0,
            renewed: 0,
            skipped: 0,
            inconclusive: 0,
            failed: 0,
            timer: Instant::now(),
        }
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.examined += other.examined;
        self.expired += other.expired;
        self.renewed += other.renewed;
        self.skipped += other.skipped;
        self.inconclusive += other.inconclusive;
        self.failed += other.failed;
    }

    /// Emit the completion event; called whether or not items failed
    pub fn finish(mut self) -> Self {
        let elapsed = self.timer.elapsed();
        self.finished_at = Some(self.started_at + elapsed);

        tracing::info!(
            job = self.job,
            examined = self.examined,
            expired = self.expired,
            renewed = self.renewed,
            skipped = self.skipped,
            inconclusive = self.inconclusive,
            failed = self.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Reconciliation run completed"
        );

        self
    }
}

/// Result of the split-state repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairSummary {
    /// Users still holding a membership backed only by expired purchases
    pub orphaned_memberships: usize,
    /// Users with some but not all membership fields set
    pub partial_states: usize,
    pub failed: usize,
}
