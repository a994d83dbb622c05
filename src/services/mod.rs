// Service modules
pub mod app_store_client;
pub mod catalog_service;
mod http;
pub mod iap_service;
pub mod play_store_client;
pub mod subscription_service;

pub use app_store_client::{AppStoreApi, AppStoreClient};
pub use catalog_service::CatalogService;
pub use iap_service::{
    AppleVerifier, GoogleVerifier, HttpReceiptValidator, PlatformVerifier, ReceiptValidator,
    ReceiptVerifier,
};
pub use play_store_client::{PlayStoreApi, PlayStoreClient};
pub use subscription_service::{ExpireOutcome, SubscriptionManager};
