use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StickySessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StickySessions::Fingerprint)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StickySessions::AccountId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StickySessions::AccountType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StickySessions::TtlSecs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StickySessions::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StickySessions::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sticky_sessions_expires_at")
                    .table(StickySessions::Table)
                    .col(StickySessions::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StickySessions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StickySessions {
    Table,
    Fingerprint,
    AccountId,
    AccountType,
    TtlSecs,
    ExpiresAt,
    CreatedAt,
}
