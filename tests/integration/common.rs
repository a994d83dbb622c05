use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use entitlements::{
    config::EntitlementConfig, models::iap::VerifyOutcome, services::ReceiptVerifier,
    services::SubscriptionManager,
};
use entity::{
    products, purchases,
    sea_orm_active_enums::{Platform, ProductKind},
    users,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{entity::*, ConnectOptions, Database, DatabaseConnection};
use time::{macros::datetime, OffsetDateTime};
use uuid::Uuid;

pub const DEFAULT_POINT: i32 = 3;
pub const DEFAULT_AI_POINT: i32 = 5;

pub const MONTHLY: &str = "membership.monthly";
pub const POINTS: &str = "points.100";

/// Fresh in-memory database with the real schema
pub async fn setup_test_db() -> DatabaseConnection {
    // A single connection keeps every query on the same in-memory database
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .expect("Failed to connect to test database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    db
}

pub fn manager(db: &DatabaseConnection) -> Arc<SubscriptionManager> {
    Arc::new(SubscriptionManager::new(
        db.clone(),
        EntitlementConfig {
            default_point: DEFAULT_POINT,
            default_ai_point: DEFAULT_AI_POINT,
        },
    ))
}

fn epoch() -> OffsetDateTime {
    datetime!(2022-01-01 0:00 UTC)
}

/// Monthly membership: 30 points / 100 AI points, renewed every 30 days
pub async fn insert_monthly_membership(db: &DatabaseConnection) -> products::Model {
    products::ActiveModel {
        id: Set(MONTHLY.to_string()),
        name: Set("Monthly membership".to_string()),
        kind: Set(ProductKind::Subscription),
        platform: Set(Platform::Ios),
        point: Set(30),
        ai_point: Set(100),
        period_days: Set(30),
        renewal_point: Set(Some(30)),
        renewal_ai_point: Set(Some(100)),
        renewal_period_days: Set(Some(30)),
        created_at: Set(epoch()),
        updated_at: Set(epoch()),
    }
    .insert(db)
    .await
    .expect("Failed to insert membership product")
}

/// One-time pack of 100 points
pub async fn insert_points_pack(db: &DatabaseConnection) -> products::Model {
    products::ActiveModel {
        id: Set(POINTS.to_string()),
        name: Set("100 points".to_string()),
        kind: Set(ProductKind::Purchase),
        platform: Set(Platform::Android),
        point: Set(100),
        ai_point: Set(0),
        period_days: Set(0),
        renewal_point: Set(None),
        renewal_ai_point: Set(None),
        renewal_period_days: Set(None),
        created_at: Set(epoch()),
        updated_at: Set(epoch()),
    }
    .insert(db)
    .await
    .expect("Failed to insert points product")
}

/// Membership window fields for a fixture user
pub struct Membership {
    pub membership_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub last_membership_at: OffsetDateTime,
    pub product_id: &'static str,
}

pub async fn insert_user(
    db: &DatabaseConnection,
    point: i32,
    ai_point: i32,
    membership: Option<Membership>,
) -> users::Model {
    let (membership_at, expires_at, last_membership_at, product_id) = match membership {
        Some(m) => (
            Some(m.membership_at),
            Some(m.expires_at),
            Some(m.last_membership_at),
            Some(m.product_id.to_string()),
        ),
        None => (None, None, None, None),
    };

    users::ActiveModel {
        id: Set(Uuid::new_v4()),
        point: Set(point),
        ai_point: Set(ai_point),
        membership_at: Set(membership_at),
        membership_expires_at: Set(expires_at),
        last_membership_at: Set(last_membership_at),
        membership_product_id: Set(product_id),
        created_at: Set(epoch()),
        updated_at: Set(epoch()),
    }
    .insert(db)
    .await
    .expect("Failed to insert user")
}

pub async fn insert_purchase(
    db: &DatabaseConnection,
    user_id: Uuid,
    product_id: &str,
    receipt: Option<&str>,
    admin_granted: bool,
) -> purchases::Model {
    purchases::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id.to_string()),
        platform: Set(Platform::Ios),
        point: Set(30),
        ai_point: Set(100),
        period_days: Set(30),
        receipt: Set(receipt.map(|r| r.to_string())),
        transaction_id: Set(format!("txn-{}", Uuid::new_v4())),
        expired: Set(false),
        expired_at: Set(None),
        admin_granted: Set(admin_granted),
        created_at: Set(epoch()),
        updated_at: Set(epoch()),
    }
    .insert(db)
    .await
    .expect("Failed to insert purchase")
}

pub async fn reload_user(db: &DatabaseConnection, id: Uuid) -> users::Model {
    users::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("Failed to load user")
        .expect("User missing")
}

pub async fn reload_purchase(db: &DatabaseConnection, id: Uuid) -> purchases::Model {
    purchases::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("Failed to load purchase")
        .expect("Purchase missing")
}

pub fn assert_reset_to_defaults(user: &users::Model) {
    assert_eq!(user.point, DEFAULT_POINT);
    assert_eq!(user.ai_point, DEFAULT_AI_POINT);
    assert_eq!(user.membership_at, None);
    assert_eq!(user.membership_expires_at, None);
    assert_eq!(user.last_membership_at, None);
    assert_eq!(user.membership_product_id, None);
}

/// Verifier with a fixed answer (overridable per receipt) that counts calls
pub struct FakeVerifier {
    outcome: VerifyOutcome,
    overrides: HashMap<String, VerifyOutcome>,
    calls: AtomicUsize,
    last_now: Mutex<Option<OffsetDateTime>>,
}

impl FakeVerifier {
    pub fn returning(outcome: VerifyOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
            last_now: Mutex::new(None),
        })
    }

    pub fn with_overrides(outcome: VerifyOutcome, overrides: &[(&str, VerifyOutcome)]) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            overrides: overrides
                .iter()
                .map(|(receipt, outcome)| (receipt.to_string(), outcome.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
            last_now: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Clock the most recent verification was judged against
    pub fn last_now(&self) -> Option<OffsetDateTime> {
        *self.last_now.lock().unwrap()
    }
}

impl ReceiptVerifier for FakeVerifier {
    async fn verify(
        &self,
        receipt: &str,
        _product: &products::Model,
        now: OffsetDateTime,
    ) -> VerifyOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_now.lock().unwrap() = Some(now);
        self.overrides
            .get(receipt)
            .cloned()
            .unwrap_or_else(|| self.outcome.clone())
    }
}
