/// Extension methods for users entity
use entity::users;
use time::{Duration, OffsetDateTime};

/// The four membership columns, which must be all-set or all-null
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipState {
    None,
    Active {
        membership_at: OffsetDateTime,
        expires_at: OffsetDateTime,
        last_membership_at: OffsetDateTime,
        product_id: String,
    },
    /// Some fields set, some null
    Partial,
}

/// Extension trait for User model
pub trait MembershipExt {
    fn membership_state(&self) -> MembershipState;

    /// Whether a renewal is due, `now - last_membership_at >= period_days`
    fn renewal_due(&self, now: OffsetDateTime, period_days: i32) -> Option<bool>;
}

impl MembershipExt for users::Model {
    fn membership_state(&self) -> MembershipState {
        match (
            self.membership_at,
            self.membership_expires_at,
            self.last_membership_at,
            self.membership_product_id.as_ref(),
        ) {
            (None, None, None, None) => MembershipState::None,
            (Some(membership_at), Some(expires_at), Some(last_membership_at), Some(product_id)) => {
                MembershipState::Active {
                    membership_at,
                    expires_at,
                    last_membership_at,
                    product_id: product_id.clone(),
                }
            }
            _ => MembershipState::Partial,
        }
    }

    fn renewal_due(&self, now: OffsetDateTime, period_days: i32) -> Option<bool> {
        let last = self.last_membership_at?;
        Some(now - last >= Duration::days(period_days as i64))
    }
}
