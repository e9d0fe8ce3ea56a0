use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

use crate::m20250601_000001_create_waitlist_tables::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReferralCodes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReferralCodes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReferralCodes::Wallet)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ReferralCodes::Code)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ReferralCodes::UsesCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ReferralCodes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_referral_codes_wallet")
                            .from(ReferralCodes::Table, ReferralCodes::Wallet)
                            .to(Users::Table, Users::Wallet)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Referrals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Referrals::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Referrals::ReferrerWallet)
                            .string_len(128)
                            .not_null(),
                    )
                    // A wallet can only ever be referred once
                    .col(
                        ColumnDef::new(Referrals::ReferredWallet)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Referrals::ReferralCode)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Referrals::PointsAwarded)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Referrals::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_referrals_referrer")
                            .from(Referrals::Table, Referrals::ReferrerWallet)
                            .to(Users::Table, Users::Wallet),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_referrals_referred")
                            .from(Referrals::Table, Referrals::ReferredWallet)
                            .to(Users::Table, Users::Wallet),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_referrals_code")
                            .from(Referrals::Table, Referrals::ReferralCode)
                            .to(ReferralCodes::Table, ReferralCodes::Code),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_referrals_referrer")
                    .table(Referrals::Table)
                    .col(Referrals::ReferrerWallet)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Referrals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReferralCodes::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum ReferralCodes {
    Table,
    Id,
    Wallet,
    Code,
    UsesCount,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Referrals {
    Table,
    Id,
    ReferrerWallet,
    ReferredWallet,
    ReferralCode,
    PointsAwarded,
    CreatedAt,
}
