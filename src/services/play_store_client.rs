use std::future::Future;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::{
    config::IAPConfig,
    error::{ReconcileError, Result},
    models::iap::{PlayLineItem, PlayProductState, PlaySubscription, PlaySubscriptionState},
    services::http::{build_client, send_with_retry, RetryPolicy},
};

const PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Google Play Developer API purchase lookups
pub trait PlayStoreApi: Send + Sync {
    fn subscription(
        &self,
        package_name: &str,
        purchase_token: &str,
    ) -> impl Future<Output = Result<PlaySubscription>> + Send;

    fn product_purchase(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> impl Future<Output = Result<PlayProductState>> + Send;
}

pub struct PlayStoreClient {
    http_client: reqwest::Client,
    service_account_key_path: Option<String>,
    api_base_url: String,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionV2Response {
    subscription_state: Option<PlaySubscriptionState>,
    #[serde(default)]
    line_items: Vec<LineItemResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItemResponse {
    product_id: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    expiry_time: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductPurchaseResponse {
    purchase_state: Option<i32>,
}

impl From<SubscriptionV2Response> for PlaySubscription {
    fn from(resp: SubscriptionV2Response) -> Self {
        PlaySubscription {
            state: resp
                .subscription_state
                .unwrap_or(PlaySubscriptionState::Unspecified),
            line_items: resp
                .line_items
                .into_iter()
                .map(|item| PlayLineItem {
                    product_id: item.product_id,
                    expiry_time: item.expiry_time,
                })
                .collect(),
        }
    }
}

impl PlayStoreClient {
    pub fn new(config: &IAPConfig) -> Result<Self> {
        Ok(Self {
            http_client: build_client(config)?,
            service_account_key_path: config.google_service_account_key_path.clone(),
            api_base_url: config.google_api_base_url.clone(),
            retry: RetryPolicy::from_config(config),
            token: Mutex::new(None),
        })
    }

    /// Return a cached access token, minting a new one a minute before expiry
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        let now = OffsetDateTime::now_utc();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::minutes(1) > now {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_access_token(now).await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_access_token(&self, now: OffsetDateTime) -> Result<CachedToken> {
        let path = self.service_account_key_path.as_deref().ok_or_else(|| {
            ReconcileError::Validation("Google service account key not configured".to_string())
        })?;

        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ReconcileError::Validation(format!("Failed to read service account key: {}", e))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            ReconcileError::Validation(format!("Malformed service account key: {}", e))
        })?;

        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: PUBLISHER_SCOPE,
            aud: token_uri,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(1)).unix_timestamp(),
        };

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ReconcileError::Validation(format!("Invalid service account key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| ReconcileError::Validation(format!("Failed to sign assertion: {}", e)))?;

        let form = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];
        let response = send_with_retry(self.retry, "Google OAuth", || {
            self.http_client.post(token_uri).form(&form)
        })
        .await?;

        if !response.status().is_success() {
            return Err(ReconcileError::Validation(format!(
                "Google OAuth returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ReconcileError::Validation(format!("Invalid token response: {}", e)))?;

        debug!(expires_in = token.expires_in, "Minted Google Play access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let access_token = self.access_token().await?;

        let response = send_with_retry(self.retry, "Google Play", || {
            self.http_client.get(url).bearer_auth(&access_token)
        })
        .await?;

        if !response.status().is_success() {
            return Err(ReconcileError::Validation(format!(
                "Google Play returned HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ReconcileError::Validation(format!("Invalid response format: {}", e)))
    }
}

impl PlayStoreApi for PlayStoreClient {
    #[instrument(skip(self, purchase_token))]
    async fn subscription(
        &self,
        package_name: &str,
        purchase_token: &str,
    ) -> Result<PlaySubscription> {
        let url = format!(
            "{}/{}/purchases/subscriptionsv2/tokens/{}",
            self.api_base_url, package_name, purchase_token
        );
        let resp: SubscriptionV2Response = self.get_json(&url).await?;
        Ok(resp.into())
    }

    #[instrument(skip(self, purchase_token))]
    async fn product_purchase(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<PlayProductState> {
        let url = format!(
            "{}/{}/purchases/products/{}/tokens/{}",
            self.api_base_url, package_name, product_id, purchase_token
        );
        let resp: ProductPurchaseResponse = self.get_json(&url).await?;

        resp.purchase_state
            .and_then(PlayProductState::from_code)
            .ok_or_else(|| {
                ReconcileError::Validation(format!(
                    "Unknown purchase state: {:?}",
                    resp.purchase_state
                ))
            })
    }
}
