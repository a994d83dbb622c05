use std::future::Future;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    config::IAPConfig,
    error::{ReconcileError, Result},
    models::iap::AppleReceiptInfo,
    services::http::{build_client, send_with_retry, RetryPolicy},
};

/// Receipt is valid but the subscription has expired; receipt info is still returned
const STATUS_SUBSCRIPTION_EXPIRED: i32 = 21006;
/// Sandbox receipt sent to production
const STATUS_SANDBOX_RECEIPT: i32 = 21007;

/// App Store receipt verification, normalized to receipt-info records
pub trait AppStoreApi: Send + Sync {
    fn verify_receipt(
        &self,
        receipt: &str,
    ) -> impl Future<Output = Result<Vec<AppleReceiptInfo>>> + Send;
}

pub struct AppStoreClient {
    http_client: reqwest::Client,
    shared_secret: String,
    production_url: String,
    sandbox_url: String,
    sandbox_only: bool,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppleReceiptResponse {
    status: i32,
    #[serde(default)]
    receipt: Option<AppleReceipt>,
    #[serde(default)]
    latest_receipt_info: Option<Vec<AppleTransaction>>,
    #[serde(default)]
    pending_renewal_info: Option<Vec<ApplePendingRenewal>>,
}

#[derive(Debug, Deserialize)]
struct AppleReceipt {
    #[serde(default)]
    in_app: Vec<AppleTransaction>,
}

#[derive(Debug, Deserialize)]
struct AppleTransaction {
    product_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    original_transaction_id: String,
    #[serde(default)]
    purchase_date_ms: Option<String>,
    #[serde(default)]
    expires_date_ms: Option<String>,
    #[serde(default)]
    cancellation_date_ms: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplePendingRenewal {
    #[serde(default)]
    original_transaction_id: Option<String>,
    #[serde(default)]
    grace_period_expires_date_ms: Option<String>,
}

fn parse_ms(value: Option<&str>) -> Option<i64> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<i64>().ok())
}

impl AppleReceiptResponse {
    /// Flatten `latest_receipt_info` and `receipt.in_app` into records, joining
    /// grace-period expiry from `pending_renewal_info` by original transaction.
    pub(crate) fn into_records(self) -> Result<Vec<AppleReceiptInfo>> {
        if self.status != 0 && self.status != STATUS_SUBSCRIPTION_EXPIRED {
            return Err(ReconcileError::Validation(format!(
                "Invalid receipt status: {}",
                self.status
            )));
        }

        let renewals = self.pending_renewal_info.unwrap_or_default();
        let grace_for = |original_transaction_id: &str| {
            renewals
                .iter()
                .filter(|r| r.original_transaction_id.as_deref() == Some(original_transaction_id))
                .filter_map(|r| parse_ms(r.grace_period_expires_date_ms.as_deref()))
                .max()
        };

        let transactions = self
            .latest_receipt_info
            .unwrap_or_default()
            .into_iter()
            .chain(self.receipt.map(|r| r.in_app).unwrap_or_default());

        Ok(transactions
            .map(|txn| AppleReceiptInfo {
                grace_period_expires_date_ms: grace_for(&txn.original_transaction_id),
                purchase_date_ms: parse_ms(txn.purchase_date_ms.as_deref()),
                expires_date_ms: parse_ms(txn.expires_date_ms.as_deref()),
                cancellation_date_ms: parse_ms(txn.cancellation_date_ms.as_deref()),
                transaction_id: txn
                    .transaction_id
                    .unwrap_or_else(|| txn.original_transaction_id.clone()),
                original_transaction_id: txn.original_transaction_id,
                product_id: txn.product_id,
            })
            .collect())
    }
}

impl AppStoreClient {
    pub fn new(config: &IAPConfig) -> Result<Self> {
        Ok(Self {
            http_client: build_client(config)?,
            shared_secret: config.apple_shared_secret.clone(),
            production_url: config.apple_production_url.clone(),
            sandbox_url: config.apple_sandbox_url.clone(),
            sandbox_only: config.apple_environment != "production",
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn post_receipt(&self, endpoint: &str, receipt: &str) -> Result<AppleReceiptResponse> {
        let request_body = serde_json::json!({
            "receipt-data": receipt,
            "password": self.shared_secret,
            "exclude-old-transactions": true,
        });

        let response = send_with_retry(self.retry, "App Store", || {
            self.http_client.post(endpoint).json(&request_body)
        })
        .await?;

        if !response.status().is_success() {
            return Err(ReconcileError::Validation(format!(
                "App Store returned HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ReconcileError::Validation(format!("Invalid response format: {}", e)))
    }
}

impl AppStoreApi for AppStoreClient {
    #[instrument(skip(self, receipt))]
    async fn verify_receipt(&self, receipt: &str) -> Result<Vec<AppleReceiptInfo>> {
        let endpoint = if self.sandbox_only {
            &self.sandbox_url
        } else {
            &self.production_url
        };

        let mut response = self.post_receipt(endpoint, receipt).await?;

        // Production rejects sandbox receipts (TestFlight, review builds)
        if response.status == STATUS_SANDBOX_RECEIPT && !self.sandbox_only {
            debug!("Sandbox receipt sent to production, retrying against sandbox");
            response = self.post_receipt(&self.sandbox_url, receipt).await?;
        }

        response.into_records()
    }
}
