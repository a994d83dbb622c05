use crate::{
    config::Config,
    jobs::{IapReconciliationJob, MembershipReconciliationJob, NightlyReconciliation},
    services::{HttpReceiptValidator, SubscriptionManager},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub validator: Arc<HttpReceiptValidator>,
    pub subscription_manager: Arc<SubscriptionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        // Connect to database
        let db = sea_orm::Database::connect(&config.database.url).await?;

        // Initialize services
        let validator = Arc::new(HttpReceiptValidator::from_config(&config.iap)?);
        let subscription_manager =
            Arc::new(SubscriptionManager::new(db.clone(), config.entitlements));

        Ok(Self {
            db,
            validator,
            subscription_manager,
            config: Arc::new(config),
        })
    }

    pub fn iap_job(&self) -> IapReconciliationJob<Arc<HttpReceiptValidator>> {
        IapReconciliationJob::new(
            self.db.clone(),
            self.validator.clone(),
            self.subscription_manager.clone(),
        )
    }

    pub fn membership_job(&self) -> MembershipReconciliationJob {
        MembershipReconciliationJob::new(self.db.clone(), self.subscription_manager.clone())
    }

    pub fn nightly_job(&self) -> NightlyReconciliation<Arc<HttpReceiptValidator>> {
        NightlyReconciliation {
            iap: self.iap_job(),
            membership: self.membership_job(),
        }
    }
}
