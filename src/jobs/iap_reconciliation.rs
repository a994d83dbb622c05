use std::sync::Arc;

use entity::purchases;
use sea_orm::{entity::*, query::*, DatabaseConnection};
use time::OffsetDateTime;
use tracing::{debug, error, instrument, warn};

use crate::{
    error::Result,
    jobs::Job,
    models::{entitlement::RunSummary, iap::VerifyOutcome},
    services::{
        catalog_service::CatalogService, iap_service::hash_receipt, ExpireOutcome,
        ReceiptVerifier, SubscriptionManager,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PurchaseAction {
    Expired,
    Kept,
    Inconclusive,
    Skipped,
}

/// Daily sweep of unexpired purchases against their payment platform
pub struct IapReconciliationJob<V> {
    db: DatabaseConnection,
    verifier: V,
    manager: Arc<SubscriptionManager>,
}

impl<V: ReceiptVerifier> IapReconciliationJob<V> {
    pub fn new(db: DatabaseConnection, verifier: V, manager: Arc<SubscriptionManager>) -> Self {
        Self {
            db,
            verifier,
            manager,
        }
    }

    #[instrument(skip(self, purchase, now), fields(purchase_id = %purchase.id, product_id = %purchase.product_id))]
    async fn reconcile_purchase(
        &self,
        purchase: &purchases::Model,
        now: OffsetDateTime,
    ) -> Result<PurchaseAction> {
        // Admin grants were vouched for at creation and are never re-checked
        if purchase.admin_granted {
            debug!("Skipping admin-granted purchase");
            return Ok(PurchaseAction::Skipped);
        }

        let Some(receipt) = purchase.receipt.as_deref() else {
            warn!("Purchase has no receipt to validate");
            return Ok(PurchaseAction::Skipped);
        };

        let product = CatalogService::require_product(&self.db, &purchase.product_id).await?;
        let outcome = self.verifier.verify(receipt, &product, now).await;

        debug!(
            receipt_hash = %hash_receipt(receipt),
            outcome = outcome.as_str(),
            "IAP reconciliation ran"
        );

        match outcome {
            VerifyOutcome::Expired => match self.manager.expire_subscription(purchase).await? {
                ExpireOutcome::Expired { .. } => Ok(PurchaseAction::Expired),
                ExpireOutcome::AlreadyExpired => Ok(PurchaseAction::Kept),
            },
            VerifyOutcome::Valid => Ok(PurchaseAction::Kept),
            // Never expire on an undetermined result; next run retries
            VerifyOutcome::Invalid { reason } => {
                error!(error_code = "VALIDATION_ERROR", "Receipt validation inconclusive: {}", reason);
                Ok(PurchaseAction::Inconclusive)
            }
        }
    }
}

impl<V: ReceiptVerifier> Job for IapReconciliationJob<V> {
    fn name(&self) -> &'static str {
        "iap_reconciliation"
    }

    async fn run(&self, now: OffsetDateTime) -> RunSummary {
        let mut summary = RunSummary::start(self.name(), now);

        let pending = purchases::Entity::find()
            .filter(purchases::Column::Expired.eq(false))
            .order_by_asc(purchases::Column::CreatedAt)
            .all(&self.db)
            .await;

        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                summary.failed += 1;
                error!(job = self.name(), error_code = "STORE_ERROR", "Failed to load purchases: {}", e);
                return summary.finish();
            }
        };

        for purchase in &pending {
            summary.examined += 1;

            match self.reconcile_purchase(purchase, now).await {
                Ok(PurchaseAction::Expired) => summary.expired += 1,
                Ok(PurchaseAction::Kept) => {}
                Ok(PurchaseAction::Inconclusive) => summary.inconclusive += 1,
                Ok(PurchaseAction::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        purchase_id = %purchase.id,
                        user_id = %purchase.user_id,
                        error_code = e.code(),
                        transient = e.is_transient(),
                        "IAP reconciliation failed: {}",
                        e
                    );
                }
            }
        }

        summary.finish()
    }
}
