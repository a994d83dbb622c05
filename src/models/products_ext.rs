/// Extension methods for products entity
///
/// Catalog rules used by grants and renewals live here rather than on the
/// generated entity in entity/src/products.rs
use entity::{products, sea_orm_active_enums::ProductKind};

use super::entitlement::RewardGrant;

/// Extension trait for Product model
pub trait ProductExt {
    /// Reward granted when the product is purchased
    fn grant(&self) -> RewardGrant;

    /// Reward granted on each renewal, if the product has one configured
    fn renewal_grant(&self) -> Option<RewardGrant>;

    fn is_subscription(&self) -> bool;
}

impl ProductExt for products::Model {
    fn grant(&self) -> RewardGrant {
        RewardGrant {
            point: self.point,
            ai_point: self.ai_point,
        }
    }

    fn renewal_grant(&self) -> Option<RewardGrant> {
        match (self.renewal_point, self.renewal_ai_point) {
            (Some(point), Some(ai_point)) => Some(RewardGrant { point, ai_point }),
            _ => None,
        }
    }

    fn is_subscription(&self) -> bool {
        self.kind == ProductKind::Subscription
    }
}
