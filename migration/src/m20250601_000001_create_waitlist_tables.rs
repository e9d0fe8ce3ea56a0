use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Wallet)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Email).string_len(254).not_null())
                    .col(
                        ColumnDef::new(Users::TwitterUsername)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Users::Points)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Leaderboard ordering
        manager
            .create_index(
                Index::create()
                    .name("idx_users_points")
                    .table(Users::Table)
                    .col(Users::Points)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Quests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Quests::QuestId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Quests::Title).string_len(256).not_null())
                    .col(ColumnDef::new(Quests::Description).text().not_null())
                    .col(
                        ColumnDef::new(Quests::RewardPoints)
                            .big_integer()
                            .not_null()
                            .default(200),
                    )
                    .col(
                        ColumnDef::new(Quests::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Quests::QuestLink).string_len(2048).null())
                    .col(ColumnDef::new(Quests::CreatedBy).string_len(128).not_null())
                    .col(
                        ColumnDef::new(Quests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Quests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_quests_created_at")
                    .table(Quests::Table)
                    .col(Quests::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CompletedQuests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CompletedQuests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CompletedQuests::Wallet)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CompletedQuests::QuestId).uuid().not_null())
                    .col(
                        ColumnDef::new(CompletedQuests::CompletedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_completed_quests_wallet")
                            .from(CompletedQuests::Table, CompletedQuests::Wallet)
                            .to(Users::Table, Users::Wallet)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_completed_quests_quest")
                            .from(CompletedQuests::Table, CompletedQuests::QuestId)
                            .to(Quests::Table, Quests::QuestId)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One completion per wallet per quest
        manager
            .create_index(
                Index::create()
                    .name("uq_completed_quests_wallet_quest")
                    .table(CompletedQuests::Table)
                    .col(CompletedQuests::Wallet)
                    .col(CompletedQuests::QuestId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CompletedQuests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Quests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Users {
    Table,
    Wallet,
    Email,
    TwitterUsername,
    Points,
    JoinedAt,
}

#[derive(DeriveIden)]
enum Quests {
    Table,
    QuestId,
    Title,
    Description,
    RewardPoints,
    Status,
    QuestLink,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CompletedQuests {
    Table,
    Id,
    Wallet,
    QuestId,
    CompletedAt,
}
