use std::{future::Future, sync::Arc};

use entity::{products, sea_orm_active_enums::Platform};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::{
    config::IAPConfig,
    error::{ReconcileError, Result},
    models::{
        iap::{
            AndroidReceipt, AppleReceiptInfo, PlayProductState, PlaySubscription,
            PlaySubscriptionState, VerifyOutcome,
        },
        products_ext::ProductExt,
    },
    services::{
        app_store_client::{AppStoreApi, AppStoreClient},
        play_store_client::{PlayStoreApi, PlayStoreClient},
    },
};

/// Receipt check as seen by the jobs: never fails, unknowns become `Invalid`
///
/// Expiry is judged against `now`, the caller's clock.
pub trait ReceiptVerifier: Send + Sync {
    fn verify(
        &self,
        receipt: &str,
        product: &products::Model,
        now: OffsetDateTime,
    ) -> impl Future<Output = VerifyOutcome> + Send;
}

/// One payment platform's verification strategy
pub trait PlatformVerifier: Send + Sync {
    fn verify(
        &self,
        receipt: &str,
        product: &products::Model,
        now: OffsetDateTime,
    ) -> impl Future<Output = Result<VerifyOutcome>> + Send;
}

impl<V: ReceiptVerifier> ReceiptVerifier for Arc<V> {
    fn verify(
        &self,
        receipt: &str,
        product: &products::Model,
        now: OffsetDateTime,
    ) -> impl Future<Output = VerifyOutcome> + Send {
        (**self).verify(receipt, product, now)
    }
}

/// Generate hash for identifying a receipt in logs without logging it
pub fn hash_receipt(receipt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(receipt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Decide an App Store entitlement from its receipt-info records.
///
/// Of the records for `product_id`, the one with the latest
/// (expiration, purchase) pair wins.
pub fn evaluate_apple_records(
    records: &[AppleReceiptInfo],
    product_id: &str,
    now_ms: i64,
) -> VerifyOutcome {
    let latest = records
        .iter()
        .filter(|r| r.product_id == product_id)
        .max_by_key(|r| {
            (
                r.expires_date_ms.unwrap_or(i64::MIN),
                r.purchase_date_ms.unwrap_or(i64::MIN),
            )
        });

    let Some(record) = latest else {
        debug!(product_id, "No active subscription found in receipt");
        return VerifyOutcome::Expired;
    };

    // Refunded or revoked by Apple
    if record.cancellation_date_ms.is_some() {
        return VerifyOutcome::Expired;
    }

    match record.expires_date_ms {
        // Non-renewing purchase
        None => VerifyOutcome::Valid,
        Some(expires_ms) if expires_ms > now_ms => VerifyOutcome::Valid,
        Some(_) => match record.grace_period_expires_date_ms {
            Some(grace_ms) if grace_ms > now_ms => VerifyOutcome::Valid,
            _ => VerifyOutcome::Expired,
        },
    }
}

/// Decide a Google Play subscription entitlement from its lifecycle state
pub fn evaluate_play_subscription(
    subscription: &PlaySubscription,
    product_id: &str,
    now: OffsetDateTime,
) -> VerifyOutcome {
    match subscription.state {
        PlaySubscriptionState::Active | PlaySubscriptionState::InGracePeriod => {
            VerifyOutcome::Valid
        }
        // The purchase never completed, so there is nothing left to entitle
        PlaySubscriptionState::Expired | PlaySubscriptionState::PendingPurchaseCanceled => {
            VerifyOutcome::Expired
        }
        // Auto-renew turned off; entitled until the paid period ends
        PlaySubscriptionState::Canceled => {
            let matching = subscription
                .line_items
                .iter()
                .filter(|item| item.product_id == product_id)
                .filter_map(|item| item.expiry_time)
                .max();
            let expiry = matching.or_else(|| {
                subscription
                    .line_items
                    .iter()
                    .filter_map(|item| item.expiry_time)
                    .max()
            });

            match expiry {
                Some(expiry) if expiry > now => VerifyOutcome::Valid,
                Some(_) => VerifyOutcome::Expired,
                None => VerifyOutcome::invalid("canceled subscription without expiry time"),
            }
        }
        other => VerifyOutcome::invalid(format!("undetermined subscription state {:?}", other)),
    }
}

pub fn evaluate_play_product(state: PlayProductState) -> VerifyOutcome {
    match state {
        PlayProductState::Purchased => VerifyOutcome::Valid,
        PlayProductState::Canceled => VerifyOutcome::Expired,
        PlayProductState::Pending => VerifyOutcome::invalid("purchase still pending"),
    }
}

/// App Store strategy
pub struct AppleVerifier<A> {
    api: A,
}

impl<A: AppStoreApi> AppleVerifier<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: AppStoreApi> PlatformVerifier for AppleVerifier<A> {
    async fn verify(
        &self,
        receipt: &str,
        product: &products::Model,
        now: OffsetDateTime,
    ) -> Result<VerifyOutcome> {
        let records = self.api.verify_receipt(receipt).await?;
        let now_ms = (now.unix_timestamp_nanos() / 1_000_000) as i64;

        Ok(evaluate_apple_records(&records, &product.id, now_ms))
    }
}

/// Google Play strategy
pub struct GoogleVerifier<G> {
    api: G,
    package_name: String,
}

impl<G: PlayStoreApi> GoogleVerifier<G> {
    pub fn new(api: G, package_name: impl Into<String>) -> Self {
        Self {
            api,
            package_name: package_name.into(),
        }
    }
}

impl<G: PlayStoreApi> PlatformVerifier for GoogleVerifier<G> {
    async fn verify(
        &self,
        receipt: &str,
        product: &products::Model,
        now: OffsetDateTime,
    ) -> Result<VerifyOutcome> {
        let token: AndroidReceipt = serde_json::from_str(receipt).map_err(|e| {
            ReconcileError::Validation(format!("Malformed Android receipt: {}", e))
        })?;
        let package_name = token.package_name.as_deref().unwrap_or(&self.package_name);

        if product.is_subscription() {
            let subscription = self
                .api
                .subscription(package_name, &token.purchase_token)
                .await?;
            Ok(evaluate_play_subscription(&subscription, &product.id, now))
        } else {
            let state = self
                .api
                .product_purchase(package_name, &product.id, &token.purchase_token)
                .await?;
            Ok(evaluate_play_product(state))
        }
    }
}

/// Dispatches to the platform strategy named by the product
pub struct ReceiptValidator<A, G> {
    apple: AppleVerifier<A>,
    google: GoogleVerifier<G>,
}

pub type HttpReceiptValidator = ReceiptValidator<AppStoreClient, PlayStoreClient>;

impl<A: AppStoreApi, G: PlayStoreApi> ReceiptValidator<A, G> {
    pub fn new(apple: AppleVerifier<A>, google: GoogleVerifier<G>) -> Self {
        Self { apple, google }
    }
}

impl HttpReceiptValidator {
    pub fn from_config(config: &IAPConfig) -> Result<Self> {
        Ok(Self::new(
            AppleVerifier::new(AppStoreClient::new(config)?),
            GoogleVerifier::new(
                PlayStoreClient::new(config)?,
                config.google_package_name.clone(),
            ),
        ))
    }
}

impl<A: AppStoreApi, G: PlayStoreApi> ReceiptVerifier for ReceiptValidator<A, G> {
    #[instrument(skip(self, receipt, product), fields(product_id = %product.id, platform = product.platform.as_str()))]
    async fn verify(
        &self,
        receipt: &str,
        product: &products::Model,
        now: OffsetDateTime,
    ) -> VerifyOutcome {
        let result = match product.platform {
            Platform::Ios => self.apple.verify(receipt, product, now).await,
            Platform::Android => self.google.verify(receipt, product, now).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    receipt_hash = %hash_receipt(receipt),
                    error_code = e.code(),
                    "Receipt verification inconclusive: {}",
                    e
                );
                VerifyOutcome::invalid(e.to_string())
            }
        }
    }
}
