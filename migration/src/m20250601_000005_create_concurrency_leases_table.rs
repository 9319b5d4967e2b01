use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConcurrencyLeases::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConcurrencyLeases::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConcurrencyLeases::OwnerId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConcurrencyLeases::RequestId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConcurrencyLeases::ExpiresAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uk_concurrency_leases_owner_request")
                    .table(ConcurrencyLeases::Table)
                    .col(ConcurrencyLeases::OwnerId)
                    .col(ConcurrencyLeases::RequestId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 清理过期租约时按 owner + 过期时间扫描
        manager
            .create_index(
                Index::create()
                    .name("idx_concurrency_leases_owner_expires")
                    .table(ConcurrencyLeases::Table)
                    .col(ConcurrencyLeases::OwnerId)
                    .col(ConcurrencyLeases::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConcurrencyLeases::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConcurrencyLeases {
    Table,
    Id,
    OwnerId,
    RequestId,
    ExpiresAt,
}
