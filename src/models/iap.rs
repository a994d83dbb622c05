use serde::Deserialize;
use time::OffsetDateTime;

/// Normalized result of checking a receipt against its platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Platform confirms the entitlement is current
    Valid,
    /// Platform confirms the entitlement has ended
    Expired,
    /// Could not determine; callers must not act on this
    Invalid { reason: String },
}

impl VerifyOutcome {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Expired => "expired",
            Self::Invalid { .. } => "invalid",
        }
    }
}

/// One receipt-info record from the App Store, timestamps in epoch millis
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppleReceiptInfo {
    pub product_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub purchase_date_ms: Option<i64>,
    pub expires_date_ms: Option<i64>,
    pub cancellation_date_ms: Option<i64>,
    pub grace_period_expires_date_ms: Option<i64>,
}

/// Google Play `subscriptionsv2` lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PlaySubscriptionState {
    #[serde(rename = "SUBSCRIPTION_STATE_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "SUBSCRIPTION_STATE_PENDING")]
    Pending,
    #[serde(rename = "SUBSCRIPTION_STATE_ACTIVE")]
    Active,
    #[serde(rename = "SUBSCRIPTION_STATE_PAUSED")]
    Paused,
    #[serde(rename = "SUBSCRIPTION_STATE_IN_GRACE_PERIOD")]
    InGracePeriod,
    #[serde(rename = "SUBSCRIPTION_STATE_ON_HOLD")]
    OnHold,
    #[serde(rename = "SUBSCRIPTION_STATE_CANCELED")]
    Canceled,
    #[serde(rename = "SUBSCRIPTION_STATE_EXPIRED")]
    Expired,
    #[serde(rename = "SUBSCRIPTION_STATE_PENDING_PURCHASE_CANCELED")]
    PendingPurchaseCanceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayLineItem {
    pub product_id: String,
    pub expiry_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySubscription {
    pub state: PlaySubscriptionState,
    pub line_items: Vec<PlayLineItem>,
}

/// `purchaseState` of a one-time Google Play product purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayProductState {
    Purchased,
    Canceled,
    Pending,
}

impl PlayProductState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Purchased),
            1 => Some(Self::Canceled),
            2 => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Android receipt as stored on a purchase: the purchase JSON the client
/// received from Play Billing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidReceipt {
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    pub purchase_token: String,
}
