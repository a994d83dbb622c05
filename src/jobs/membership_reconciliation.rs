use std::sync::Arc;

use entity::users;
use sea_orm::{entity::*, query::*, DatabaseConnection};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument};

use crate::{
    error::{ReconcileError, Result},
    jobs::Job,
    models::{entitlement::RunSummary, products_ext::ProductExt, users_ext::MembershipExt},
    services::{catalog_service::CatalogService, SubscriptionManager},
};

/// Daily sweep over membership windows: expire lapsed ones, then top up
/// active ones whose renewal period has elapsed.
pub struct MembershipReconciliationJob {
    db: DatabaseConnection,
    manager: Arc<SubscriptionManager>,
}

impl MembershipReconciliationJob {
    pub fn new(db: DatabaseConnection, manager: Arc<SubscriptionManager>) -> Self {
        Self { db, manager }
    }

    /// Users whose window has closed lose membership and fall back to defaults
    pub async fn expiration_pass(&self, now: OffsetDateTime) -> RunSummary {
        let mut summary = RunSummary::start("membership_expiration", now);

        let lapsed = users::Entity::find()
            .filter(users::Column::MembershipAt.is_not_null())
            .filter(users::Column::MembershipExpiresAt.lt(now))
            .all(&self.db)
            .await;

        let lapsed = match lapsed {
            Ok(lapsed) => lapsed,
            Err(e) => {
                summary.failed += 1;
                error!(error_code = "STORE_ERROR", "Failed to load lapsed memberships: {}", e);
                return summary.finish();
            }
        };

        for user in lapsed {
            summary.examined += 1;
            let user_id = user.id;

            match self.manager.reset_membership(&self.db, user, now).await {
                Ok(_) => {
                    summary.expired += 1;
                    info!(user_id = %user_id, "Membership expired");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(user_id = %user_id, error_code = e.code(), "Membership expiration failed: {}", e);
                }
            }
        }

        summary.finish()
    }

    /// Users still inside their window get the renewal grant once per
    /// renewal period. Balances are replaced, not accumulated.
    pub async fn renewal_pass(&self, now: OffsetDateTime) -> RunSummary {
        let mut summary = RunSummary::start("membership_renewal", now);

        let active = users::Entity::find()
            .filter(users::Column::MembershipAt.is_not_null())
            .filter(users::Column::MembershipExpiresAt.gt(now))
            .all(&self.db)
            .await;

        let active = match active {
            Ok(active) => active,
            Err(e) => {
                summary.failed += 1;
                error!(error_code = "STORE_ERROR", "Failed to load active memberships: {}", e);
                return summary.finish();
            }
        };

        for user in active {
            summary.examined += 1;
            let user_id = user.id;

            match self.renew_user(user, now).await {
                Ok(true) => summary.renewed += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        user_id = %user_id,
                        error_code = e.code(),
                        transient = e.is_transient(),
                        "Membership renewal failed: {}",
                        e
                    );
                }
            }
        }

        summary.finish()
    }

    /// Returns whether the user was renewed
    #[instrument(skip(self, user, now), fields(user_id = %user.id))]
    async fn renew_user(&self, user: users::Model, now: OffsetDateTime) -> Result<bool> {
        let product_id = user.membership_product_id.clone().ok_or_else(|| {
            ReconcileError::InvalidState("membership window without product".to_string())
        })?;

        let product = CatalogService::find_product(&self.db, &product_id)
            .await?
            .ok_or_else(|| {
                ReconcileError::Catalog(format!("Membership product {} not found", product_id))
            })?;

        if !product.is_subscription() {
            return Err(ReconcileError::Catalog(format!(
                "Membership product {} is not a subscription",
                product_id
            )));
        }

        let grant = product.renewal_grant().ok_or_else(|| {
            ReconcileError::Catalog(format!("Product {} has no renewal grant", product_id))
        })?;

        let period_days = product
            .renewal_period_days
            .filter(|days| *days > 0)
            .ok_or_else(|| {
                ReconcileError::Catalog(format!("Product {} has no renewal period", product_id))
            })?;

        let due = user.renewal_due(now, period_days).ok_or_else(|| {
            ReconcileError::InvalidState("membership window without last renewal".to_string())
        })?;

        if !due {
            debug!("Membership renewal not yet due");
            return Ok(false);
        }

        let mut user_active: users::ActiveModel = user.into();
        user_active.point = Set(grant.point);
        user_active.ai_point = Set(grant.ai_point);
        user_active.last_membership_at = Set(Some(now));
        user_active.updated_at = Set(now);
        user_active.update(&self.db).await?;

        info!(
            product_id = %product_id,
            point = grant.point,
            ai_point = grant.ai_point,
            "Membership renewed"
        );

        Ok(true)
    }
}

impl Job for MembershipReconciliationJob {
    fn name(&self) -> &'static str {
        "membership_reconciliation"
    }

    /// Expiration runs first so a user due for both ends up expired
    async fn run(&self, now: OffsetDateTime) -> RunSummary {
        let mut summary = RunSummary::start(self.name(), now);
        summary.merge(&self.expiration_pass(now).await);
        summary.merge(&self.renewal_pass(now).await);
        summary.finish()
    }
}
