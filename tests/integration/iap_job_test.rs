use entitlements::{
    jobs::{IapReconciliationJob, Job},
    models::iap::VerifyOutcome,
};
use sea_orm::ConnectionTrait;
use time::macros::datetime;

use crate::common::*;

fn active_monthly() -> Membership {
    Membership {
        membership_at: datetime!(2023-01-01 0:00 UTC),
        expires_at: datetime!(2023-01-31 0:00 UTC),
        last_membership_at: datetime!(2023-01-01 0:00 UTC),
        product_id: MONTHLY,
    }
}

#[tokio::test]
async fn test_lapsed_receipt_expires_purchase_and_resets_user() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(&db, 30, 100, Some(active_monthly())).await;
    let purchase = insert_purchase(&db, user.id, MONTHLY, Some("lapsed"), false).await;

    // Platform reports "no active subscription"
    let verifier = FakeVerifier::returning(VerifyOutcome::Expired);
    let job = IapReconciliationJob::new(db.clone(), verifier.clone(), manager(&db));
    let summary = job.run(datetime!(2023-01-15 0:00 UTC)).await;

    assert_eq!(verifier.calls(), 1);
    assert_eq!(verifier.last_now(), Some(datetime!(2023-01-15 0:00 UTC)));
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.finished_at.is_some());

    assert!(reload_purchase(&db, purchase.id).await.expired);
    assert_reset_to_defaults(&reload_user(&db, user.id).await);

    // Nothing left to examine on the next run
    let summary = job.run(datetime!(2023-01-16 0:00 UTC)).await;
    assert_eq!(summary.examined, 0);
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn test_admin_granted_purchase_is_never_validated() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(&db, 0, 0, None).await;
    let manager = manager(&db);
    let purchase = manager
        .create_subscription_without_validation(user.id, MONTHLY, "admin-grant")
        .await
        .unwrap();

    // Would expire everything it is asked about
    let verifier = FakeVerifier::returning(VerifyOutcome::Expired);
    let job = IapReconciliationJob::new(db.clone(), verifier.clone(), manager);
    let summary = job.run(datetime!(2023-01-15 0:00 UTC)).await;

    assert_eq!(verifier.calls(), 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.expired, 0);

    assert!(!reload_purchase(&db, purchase.id).await.expired);
    let stored = reload_user(&db, user.id).await;
    assert_eq!((stored.point, stored.ai_point), (30, 100));
    assert_eq!(stored.membership_product_id.as_deref(), Some(MONTHLY));
}

#[tokio::test]
async fn test_admin_granted_receipt_is_ignored_too() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(&db, 30, 100, Some(active_monthly())).await;
    let purchase = insert_purchase(&db, user.id, MONTHLY, Some("lapsed"), true).await;

    let verifier = FakeVerifier::returning(VerifyOutcome::Expired);
    let job = IapReconciliationJob::new(db.clone(), verifier.clone(), manager(&db));
    job.run(datetime!(2023-01-15 0:00 UTC)).await;

    assert_eq!(verifier.calls(), 0);
    assert!(!reload_purchase(&db, purchase.id).await.expired);
    assert_eq!(reload_user(&db, user.id).await.point, 30);
}

#[tokio::test]
async fn test_valid_and_inconclusive_results_change_nothing() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let active = insert_user(&db, 30, 100, Some(active_monthly())).await;
    let unknown = insert_user(&db, 30, 100, Some(active_monthly())).await;
    let active_purchase = insert_purchase(&db, active.id, MONTHLY, Some("active"), false).await;
    let unknown_purchase = insert_purchase(&db, unknown.id, MONTHLY, Some("garbled"), false).await;

    let verifier = FakeVerifier::with_overrides(
        VerifyOutcome::Valid,
        &[("garbled", VerifyOutcome::invalid("status 21002"))],
    );
    let job = IapReconciliationJob::new(db.clone(), verifier.clone(), manager(&db));
    let summary = job.run(datetime!(2023-01-15 0:00 UTC)).await;

    assert_eq!(verifier.calls(), 2);
    assert_eq!(summary.examined, 2);
    assert_eq!(summary.expired, 0);
    assert_eq!(summary.inconclusive, 1);

    assert!(!reload_purchase(&db, active_purchase.id).await.expired);
    assert!(!reload_purchase(&db, unknown_purchase.id).await.expired);
    assert_eq!(reload_user(&db, unknown.id).await.point, 30);
}

#[tokio::test]
async fn test_user_without_membership_keeps_balances() {
    let db = setup_test_db().await;
    insert_points_pack(&db).await;
    let user = insert_user(&db, 250, 40, None).await;
    let purchase = insert_purchase(&db, user.id, POINTS, Some("refunded"), false).await;

    let verifier = FakeVerifier::returning(VerifyOutcome::Expired);
    let job = IapReconciliationJob::new(db.clone(), verifier, manager(&db));
    let summary = job.run(datetime!(2023-01-15 0:00 UTC)).await;

    assert_eq!(summary.expired, 1);
    assert!(reload_purchase(&db, purchase.id).await.expired);

    let stored = reload_user(&db, user.id).await;
    assert_eq!((stored.point, stored.ai_point), (250, 40));
    assert_eq!(stored.membership_at, None);
}

#[tokio::test]
async fn test_failing_purchase_does_not_block_others() {
    let db = setup_test_db().await;
    insert_monthly_membership(&db).await;
    let user = insert_user(&db, 30, 100, Some(active_monthly())).await;
    let good = insert_purchase(&db, user.id, MONTHLY, Some("lapsed"), false).await;

    // Purchase pointing at a product the catalog no longer has
    db.execute_unprepared("PRAGMA foreign_keys = OFF").await.unwrap();
    let orphan = insert_purchase(&db, user.id, "retired.product", Some("orphan"), false).await;

    let verifier = FakeVerifier::returning(VerifyOutcome::Expired);
    let job = IapReconciliationJob::new(db.clone(), verifier.clone(), manager(&db));
    let summary = job.run(datetime!(2023-01-15 0:00 UTC)).await;

    assert_eq!(summary.examined, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.expired, 1);
    assert_eq!(verifier.calls(), 1);

    assert!(reload_purchase(&db, good.id).await.expired);
    assert!(!reload_purchase(&db, orphan.id).await.expired);
}
