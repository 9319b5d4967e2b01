use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let counters = [
            UsageStats::Requests,
            UsageStats::InputTokens,
            UsageStats::OutputTokens,
            UsageStats::CacheCreateTokens,
            UsageStats::CacheReadTokens,
            UsageStats::Ephemeral5mTokens,
            UsageStats::Ephemeral1hTokens,
            UsageStats::AllTokens,
            UsageStats::LongContextInputTokens,
            UsageStats::LongContextOutputTokens,
            UsageStats::LongContextRequests,
        ];

        let mut table = Table::create();
        table
            .table(UsageStats::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(UsageStats::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(UsageStats::PrincipalId)
                    .string_len(128)
                    .not_null(),
            )
            .col(
                ColumnDef::new(UsageStats::PrincipalType)
                    .string_len(16)
                    .not_null(),
            )
            .col(ColumnDef::new(UsageStats::Model).string_len(128).not_null())
            .col(
                ColumnDef::new(UsageStats::Granularity)
                    .string_len(8)
                    .not_null(),
            )
            .col(ColumnDef::new(UsageStats::Bucket).string_len(16).not_null());
        for counter in counters {
            table.col(
                ColumnDef::new(counter)
                    .big_integer()
                    .not_null()
                    .default(0),
            );
        }
        table.col(
            ColumnDef::new(UsageStats::UpdatedAt)
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        );

        manager.create_table(table.to_owned()).await?;

        // 原子累加依赖该唯一索引触发 ON CONFLICT
        manager
            .create_index(
                Index::create()
                    .name("uk_usage_stats_bucket")
                    .table(UsageStats::Table)
                    .col(UsageStats::PrincipalId)
                    .col(UsageStats::PrincipalType)
                    .col(UsageStats::Model)
                    .col(UsageStats::Granularity)
                    .col(UsageStats::Bucket)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UsageStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UsageStats {
    Table,
    Id,
    PrincipalId,
    PrincipalType,
    Model,
    Granularity,
    Bucket,
    Requests,
    InputTokens,
    OutputTokens,
    CacheCreateTokens,
    CacheReadTokens,
    #[sea_orm(iden = "ephemeral_5m_tokens")]
    Ephemeral5mTokens,
    #[sea_orm(iden = "ephemeral_1h_tokens")]
    Ephemeral1hTokens,
    AllTokens,
    LongContextInputTokens,
    LongContextOutputTokens,
    LongContextRequests,
    UpdatedAt,
}
