use entitlements::jobs::{Job, MembershipReconciliationJob};
use entity::{products, sea_orm_active_enums::ProductKind};
use sea_orm::{entity::*, DatabaseConnection};
use time::macros::datetime;

use crate::common::*;

fn job(db: &DatabaseConnection) -> MembershipReconciliationJob {
    MembershipReconciliationJob::new(db.clone(), manager(db))
}

#[tokio::test]
async fn test_lapsed_membership_is_expired() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(
        &db,
        12,
        40,
        Some(Membership {
            membership_at: datetime!(2022-12-29 0:00 UTC),
            expires_at: datetime!(2023-01-29 0:00 UTC),
            last_membership_at: datetime!(2022-12-29 0:00 UTC),
            product_id: MONTHLY,
        }),
    )
    .await;

    let summary = job(&db).run(datetime!(2023-02-01 0:00 UTC)).await;

    assert_eq!(summary.expired, 1);
    assert_eq!(summary.renewed, 0);
    assert_eq!(summary.failed, 0);
    assert_reset_to_defaults(&reload_user(&db, user.id).await);
}

#[tokio::test]
async fn test_renewal_replaces_balances() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(
        &db,
        10,
        10,
        Some(Membership {
            membership_at: datetime!(2023-01-01 0:00 UTC),
            expires_at: datetime!(2023-03-01 0:00 UTC),
            last_membership_at: datetime!(2023-01-01 0:00 UTC),
            product_id: MONTHLY,
        }),
    )
    .await;

    let now = datetime!(2023-02-01 0:00 UTC);
    let summary = job(&db).run(now).await;
    assert_eq!(summary.renewed, 1);

    let stored = reload_user(&db, user.id).await;
    assert_eq!((stored.point, stored.ai_point), (30, 100));
    assert_eq!(stored.last_membership_at, Some(now));
    assert_eq!(stored.membership_at, Some(datetime!(2023-01-01 0:00 UTC)));
    assert_eq!(stored.membership_expires_at, Some(datetime!(2023-03-01 0:00 UTC)));
    assert_eq!(stored.membership_product_id.as_deref(), Some(MONTHLY));

    // Same day again: period restarted, nothing to grant
    let summary = job(&db).run(now).await;
    assert_eq!(summary.renewed, 0);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_renewal_not_due_leaves_user_alone() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(
        &db,
        10,
        10,
        Some(Membership {
            membership_at: datetime!(2023-01-20 0:00 UTC),
            expires_at: datetime!(2023-03-01 0:00 UTC),
            last_membership_at: datetime!(2023-01-20 0:00 UTC),
            product_id: MONTHLY,
        }),
    )
    .await;
    let before = reload_user(&db, user.id).await;

    let summary = job(&db).run(datetime!(2023-02-01 0:00 UTC)).await;

    assert_eq!(summary.renewed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(reload_user(&db, user.id).await, before);
}

#[tokio::test]
async fn test_renewal_boundary_is_inclusive() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(
        &db,
        0,
        0,
        Some(Membership {
            membership_at: datetime!(2023-01-02 0:00 UTC),
            expires_at: datetime!(2023-06-01 0:00 UTC),
            last_membership_at: datetime!(2023-01-02 0:00 UTC),
            product_id: MONTHLY,
        }),
    )
    .await;

    // Exactly 30 days later
    let summary = job(&db).run(datetime!(2023-02-01 0:00 UTC)).await;

    assert_eq!(summary.renewed, 1);
    assert_eq!(reload_user(&db, user.id).await.point, 30);
}

#[tokio::test]
async fn test_expiration_takes_precedence_over_renewal() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(
        &db,
        10,
        10,
        Some(Membership {
            membership_at: datetime!(2022-12-01 0:00 UTC),
            expires_at: datetime!(2023-01-29 0:00 UTC),
            last_membership_at: datetime!(2022-12-01 0:00 UTC),
            product_id: MONTHLY,
        }),
    )
    .await;

    let summary = job(&db).run(datetime!(2023-02-01 0:00 UTC)).await;

    assert_eq!(summary.expired, 1);
    assert_eq!(summary.renewed, 0);
    assert_reset_to_defaults(&reload_user(&db, user.id).await);
}

#[tokio::test]
async fn test_user_without_membership_is_untouched() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(&db, 999, 1, None).await;
    let before = reload_user(&db, user.id).await;

    let summary = job(&db).run(datetime!(2023-02-01 0:00 UTC)).await;

    assert_eq!(summary.examined, 0);
    assert_eq!(reload_user(&db, user.id).await, before);
}

#[tokio::test]
async fn test_misconfigured_product_fails_only_that_user() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;

    // Subscription with no renewal grant configured
    products::ActiveModel {
        id: Set("membership.legacy".to_string()),
        name: Set("Legacy membership".to_string()),
        kind: Set(ProductKind::Subscription),
        platform: Set(entity::sea_orm_active_enums::Platform::Android),
        point: Set(50),
        ai_point: Set(50),
        period_days: Set(30),
        renewal_point: Set(None),
        renewal_ai_point: Set(None),
        renewal_period_days: Set(None),
        created_at: Set(datetime!(2022-01-01 0:00 UTC)),
        updated_at: Set(datetime!(2022-01-01 0:00 UTC)),
    }
    .insert(&db)
    .await
    .unwrap();

    let window = |product_id| Membership {
        membership_at: datetime!(2023-01-01 0:00 UTC),
        expires_at: datetime!(2023-03-01 0:00 UTC),
        last_membership_at: datetime!(2023-01-01 0:00 UTC),
        product_id,
    };
    let legacy = insert_user(&db, 5, 5, Some(window("membership.legacy"))).await;
    let ghost = insert_user(&db, 5, 5, Some(window("membership.deleted"))).await;
    let healthy = insert_user(&db, 5, 5, Some(window(MONTHLY))).await;

    let summary = job(&db).run(datetime!(2023-02-01 0:00 UTC)).await;

    assert_eq!(summary.examined, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.renewed, 1);

    assert_eq!(reload_user(&db, legacy.id).await.point, 5);
    assert_eq!(reload_user(&db, ghost.id).await.point, 5);
    assert_eq!(reload_user(&db, healthy.id).await.point, 30);
}
