use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create users table (FIRST - purchases reference this)
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_uuid(Users::Id))
                    .col(integer(Users::Point).default(0).not_null())
                    .col(integer(Users::AiPoint).default(0).not_null())
                    .col(timestamp_with_time_zone_null(Users::MembershipAt))
                    .col(timestamp_with_time_zone_null(Users::MembershipExpiresAt))
                    .col(timestamp_with_time_zone_null(Users::LastMembershipAt))
                    .col(string_null(Users::MembershipProductId))
                    .col(
                        timestamp_with_time_zone(Users::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Users::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Create products table (catalog, keyed by store product id)
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(string(Products::Id).primary_key())
                    .col(string(Products::Name).not_null())
                    .col(string_len(Products::Kind, 16).not_null())
                    .col(string_len(Products::Platform, 16).not_null())
                    .col(integer(Products::Point).default(0).not_null())
                    .col(integer(Products::AiPoint).default(0).not_null())
                    .col(integer(Products::PeriodDays).default(0).not_null())
                    .col(integer_null(Products::RenewalPoint))
                    .col(integer_null(Products::RenewalAiPoint))
                    .col(integer_null(Products::RenewalPeriodDays))
                    .col(
                        timestamp_with_time_zone(Products::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Products::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Create purchases table
        manager
            .create_table(
                Table::create()
                    .table(Purchases::Table)
                    .if_not_exists()
                    .col(pk_uuid(Purchases::Id))
                    .col(uuid(Purchases::UserId).not_null())
                    .col(string(Purchases::ProductId).not_null())
                    .col(string_len(Purchases::Platform, 16).not_null())
                    .col(integer(Purchases::Point).not_null())
                    .col(integer(Purchases::AiPoint).not_null())
                    .col(integer(Purchases::PeriodDays).not_null())
                    .col(text_null(Purchases::Receipt))
                    .col(string(Purchases::TransactionId).unique_key().not_null())
                    .col(boolean(Purchases::Expired).default(false).not_null())
                    .col(timestamp_with_time_zone_null(Purchases::ExpiredAt))
                    .col(boolean(Purchases::AdminGranted).default(false).not_null())
                    .col(
                        timestamp_with_time_zone(Purchases::CreatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(Purchases::UpdatedAt)
                            .default(Expr::current_timestamp())
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchases_user_id")
                            .from(Purchases::Table, Purchases::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchases_product_id")
                            .from(Purchases::Table, Purchases::ProductId)
                            .to(Products::Table, Products::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_purchases_user_id")
                    .table(Purchases::Table)
                    .col(Purchases::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Purchases::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Users {
    Table,
    Id,
    Point,
    AiPoint,
    MembershipAt,
    MembershipExpiresAt,
    LastMembershipAt,
    MembershipProductId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Products {
    Table,
    Id,
    Name,
    Kind,
    Platform,
    Point,
    AiPoint,
    PeriodDays,
    RenewalPoint,
    RenewalAiPoint,
    RenewalPeriodDays,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum Purchases {
    Table,
    Id,
    UserId,
    ProductId,
    Platform,
    Point,
    AiPoint,
    PeriodDays,
    Receipt,
    TransactionId,
    Expired,
    ExpiredAt,
    AdminGranted,
    CreatedAt,
    UpdatedAt,
}
