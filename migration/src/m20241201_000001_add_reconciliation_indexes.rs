use sea_orm_migration::prelude::*;

use crate::m20220101_000001_create_table::{Purchases, Users};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Daily IAP sweep selects by expired flag
        manager
            .create_index(
                Index::create()
                    .name("idx_purchases_expired")
                    .table(Purchases::Table)
                    .col(Purchases::Expired)
                    .to_owned(),
            )
            .await?;

        // Membership sweep compares against the expiration timestamp
        manager
            .create_index(
                Index::create()
                    .name("idx_users_membership_expires_at")
                    .table(Users::Table)
                    .col(Users::MembershipExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_users_membership_expires_at")
                    .table(Users::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_purchases_expired")
                    .table(Purchases::Table)
                    .to_owned(),
            )
            .await
    }
}
