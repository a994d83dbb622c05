use entity::{products, purchases, users};
use sea_orm::{
    entity::*, query::*, sea_query::Expr, Condition, ConnectionTrait, DatabaseConnection, SqlErr,
    TransactionTrait,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::EntitlementConfig,
    error::{ReconcileError, Result},
    models::{
        entitlement::RepairSummary,
        iap::VerifyOutcome,
        products_ext::ProductExt,
        users_ext::{MembershipExt, MembershipState},
    },
    services::{catalog_service::CatalogService, iap_service::ReceiptVerifier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Purchase was already expired; nothing changed
    AlreadyExpired,
    Expired {
        /// Whether the owner's membership and balances were reset
        membership_reset: bool,
    },
}

/// Applies entitlement state transitions to purchases and users
pub struct SubscriptionManager {
    db: DatabaseConnection,
    defaults: EntitlementConfig,
}

impl SubscriptionManager {
    pub fn new(db: DatabaseConnection, defaults: EntitlementConfig) -> Self {
        Self { db, defaults }
    }

    /// Mark a purchase expired and, if it backs the owner's current
    /// membership, reset the owner's balances and membership window.
    ///
    /// Both writes commit together. Idempotent: an already expired purchase is
    /// left untouched, including when another caller expired it first.
    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id, user_id = %purchase.user_id))]
    pub async fn expire_subscription(&self, purchase: &purchases::Model) -> Result<ExpireOutcome> {
        if purchase.expired {
            return Ok(ExpireOutcome::AlreadyExpired);
        }

        let now = OffsetDateTime::now_utc();
        let txn = self.db.begin().await?;

        // Conditional flip so a concurrent expire cannot apply the reset twice
        let flipped = purchases::Entity::update_many()
            .col_expr(purchases::Column::Expired, Expr::value(true))
            .col_expr(purchases::Column::ExpiredAt, Expr::value(now))
            .col_expr(purchases::Column::UpdatedAt, Expr::value(now))
            .filter(purchases::Column::Id.eq(purchase.id))
            .filter(purchases::Column::Expired.eq(false))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            txn.rollback().await?;
            debug!("Purchase already expired by another writer");
            return Ok(ExpireOutcome::AlreadyExpired);
        }

        let owner = users::Entity::find_by_id(purchase.user_id).one(&txn).await?;
        let membership_reset = match owner {
            Some(user)
                if user.membership_product_id.as_deref() == Some(purchase.product_id.as_str()) =>
            {
                self.reset_membership(&txn, user, now).await?;
                true
            }
            Some(_) => false,
            None => {
                warn!("Owner of expired purchase not found");
                false
            }
        };

        txn.commit().await?;

        info!(
            product_id = %purchase.product_id,
            membership_reset,
            "Expired subscription"
        );

        Ok(ExpireOutcome::Expired { membership_reset })
    }

    /// Reset balances to defaults and clear all four membership fields together
    pub async fn reset_membership<C: ConnectionTrait>(
        &self,
        conn: &C,
        user: users::Model,
        now: OffsetDateTime,
    ) -> Result<users::Model> {
        let mut user_active: users::ActiveModel = user.into();
        user_active.point = Set(self.defaults.default_point);
        user_active.ai_point = Set(self.defaults.default_ai_point);
        user_active.membership_at = Set(None);
        user_active.membership_expires_at = Set(None);
        user_active.last_membership_at = Set(None);
        user_active.membership_product_id = Set(None);
        user_active.updated_at = Set(now);

        Ok(user_active.update(conn).await?)
    }

    /// Grant an entitlement an operator vouches for. The purchase is flagged
    /// admin-granted and is never sent for receipt validation afterwards.
    #[instrument(skip(self))]
    pub async fn create_subscription_without_validation(
        &self,
        user_id: Uuid,
        product_id: &str,
        transaction_id: &str,
    ) -> Result<purchases::Model> {
        let product = CatalogService::require_product(&self.db, product_id).await?;

        let txn = self.db.begin().await?;
        let purchase = self
            .grant_in_txn(&txn, user_id, &product, None, transaction_id, true)
            .await?;
        txn.commit().await?;

        info!(
            purchase_id = %purchase.id,
            point = purchase.point,
            ai_point = purchase.ai_point,
            "Admin-granted subscription created"
        );

        Ok(purchase)
    }

    /// Verify a receipt and, only if the platform confirms it, record the
    /// purchase and apply its grant.
    #[instrument(skip(self, verifier, receipt))]
    pub async fn create_subscription<V: ReceiptVerifier>(
        &self,
        verifier: &V,
        user_id: Uuid,
        product_id: &str,
        receipt: &str,
        transaction_id: &str,
    ) -> Result<purchases::Model> {
        let product = CatalogService::require_product(&self.db, product_id).await?;

        match verifier.verify(receipt, &product, OffsetDateTime::now_utc()).await {
            VerifyOutcome::Valid => {}
            VerifyOutcome::Expired => {
                return Err(ReconcileError::Validation(format!(
                    "Receipt for {} is no longer active",
                    product_id
                )))
            }
            VerifyOutcome::Invalid { reason } => return Err(ReconcileError::Validation(reason)),
        }

        let txn = self.db.begin().await?;
        let purchase = self
            .grant_in_txn(&txn, user_id, &product, Some(receipt), transaction_id, false)
            .await?;
        txn.commit().await?;

        info!(purchase_id = %purchase.id, "Validated subscription created");

        Ok(purchase)
    }

    async fn grant_in_txn<C: ConnectionTrait>(
        &self,
        txn: &C,
        user_id: Uuid,
        product: &products::Model,
        receipt: Option<&str>,
        transaction_id: &str,
        admin_granted: bool,
    ) -> Result<purchases::Model> {
        let user = users::Entity::find_by_id(user_id)
            .one(txn)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("User {} not found", user_id)))?;

        if let Some(existing) = purchases::Entity::find()
            .filter(purchases::Column::TransactionId.eq(transaction_id))
            .one(txn)
            .await?
        {
            return Err(ReconcileError::Conflict(format!(
                "Transaction {} already processed at {}",
                transaction_id, existing.created_at
            )));
        }

        let now = OffsetDateTime::now_utc();
        let grant = product.grant();

        let new_purchase = purchases::ActiveModel {
            id: Set(Uuid::now_v7()),
            user_id: Set(user_id),
            product_id: Set(product.id.clone()),
            platform: Set(product.platform),
            point: Set(grant.point),
            ai_point: Set(grant.ai_point),
            period_days: Set(product.period_days),
            receipt: Set(receipt.map(|s| s.to_string())),
            transaction_id: Set(transaction_id.to_string()),
            expired: Set(false),
            expired_at: Set(None),
            admin_granted: Set(admin_granted),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let purchase = new_purchase.insert(txn).await.map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ReconcileError::Conflict(format!(
                "Transaction {} already processed",
                transaction_id
            )),
            _ => ReconcileError::Store(e),
        })?;

        let mut user_active: users::ActiveModel = user.into();
        if product.is_subscription() {
            // Membership allowance replaces whatever the user held
            user_active.point = Set(grant.point);
            user_active.ai_point = Set(grant.ai_point);
            user_active.membership_at = Set(Some(now));
            user_active.membership_expires_at =
                Set(Some(now + Duration::days(product.period_days as i64)));
            user_active.last_membership_at = Set(Some(now));
            user_active.membership_product_id = Set(Some(product.id.clone()));
        } else {
            let point = *user_active.point.as_ref();
            let ai_point = *user_active.ai_point.as_ref();
            user_active.point = Set(point + grant.point);
            user_active.ai_point = Set(ai_point + grant.ai_point);
        }
        user_active.updated_at = Set(now);
        user_active.update(txn).await?;

        Ok(purchase)
    }

    /// Find and fix entitlement states a crash or legacy write could have left
    /// behind: memberships whose backing purchases are all expired, and
    /// users with only some membership fields set.
    #[instrument(skip(self))]
    pub async fn repair_split_states(&self) -> Result<RepairSummary> {
        let candidates = users::Entity::find()
            .filter(
                Condition::any()
                    .add(users::Column::MembershipAt.is_not_null())
                    .add(users::Column::MembershipExpiresAt.is_not_null())
                    .add(users::Column::LastMembershipAt.is_not_null())
                    .add(users::Column::MembershipProductId.is_not_null()),
            )
            .all(&self.db)
            .await?;

        let mut summary = RepairSummary::default();
        let now = OffsetDateTime::now_utc();

        for user in candidates {
            let user_id = user.id;
            match self.repair_user(user, now).await {
                Ok(Some(MembershipState::Partial)) => summary.partial_states += 1,
                Ok(Some(_)) => summary.orphaned_memberships += 1,
                Ok(None) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(user_id = %user_id, error_code = e.code(), "Repair failed: {}", e);
                }
            }
        }

        info!(
            orphaned_memberships = summary.orphaned_memberships,
            partial_states = summary.partial_states,
            failed = summary.failed,
            "Split-state repair completed"
        );

        Ok(summary)
    }

    /// Returns the state that was repaired, if any
    async fn repair_user(
        &self,
        user: users::Model,
        now: OffsetDateTime,
    ) -> Result<Option<MembershipState>> {
        let state = user.membership_state();

        let needs_reset = match &state {
            MembershipState::None => false,
            MembershipState::Partial => true,
            MembershipState::Active { product_id, .. } => {
                let backing = purchases::Entity::find()
                    .filter(purchases::Column::UserId.eq(user.id))
                    .filter(purchases::Column::ProductId.eq(product_id.as_str()))
                    .all(&self.db)
                    .await?;

                // A membership with no purchase rows at all predates purchase
                // tracking and is left to the membership sweep.
                !backing.is_empty() && backing.iter().all(|p| p.expired)
            }
        };

        if !needs_reset {
            return Ok(None);
        }

        warn!(user_id = %user.id, state = ?state, "Resetting split entitlement state");
        self.reset_membership(&self.db, user, now).await?;
        Ok(Some(state))
    }
}
