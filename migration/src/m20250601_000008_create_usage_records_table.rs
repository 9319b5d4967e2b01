use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UsageRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UsageRecords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::PrincipalId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::Model)
                            .string_len(128)
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::Endpoint)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::InputTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::OutputTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::CacheTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::Cost)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::ResponseTimeMs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UsageRecords::StatusCode)
                            .integer()
                            .not_null()
                            .default(200),
                    )
                    .col(ColumnDef::new(UsageRecords::Error).text())
                    .col(ColumnDef::new(UsageRecords::Metadata).text().not_null())
                    .col(
                        ColumnDef::new(UsageRecords::CreatedAt)
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
                    .name("idx_usage_records_principal_created")
                    .table(UsageRecords::Table)
                    .col(UsageRecords::PrincipalId)
                    .col(UsageRecords::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UsageRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UsageRecords {
    Table,
    Id,
    PrincipalId,
    Model,
    Endpoint,
    InputTokens,
    OutputTokens,
    CacheTokens,
    Cost,
    ResponseTimeMs,
    StatusCode,
    Error,
    Metadata,
    CreatedAt,
}
