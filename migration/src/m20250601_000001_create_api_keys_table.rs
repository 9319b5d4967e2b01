use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiKeys::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiKeys::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApiKeys::Name).string_len(255).not_null())
                    .col(ColumnDef::new(ApiKeys::Description).text())
                    .col(
                        ColumnDef::new(ApiKeys::SecretHash)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ApiKeys::Preview).string_len(32).not_null())
                    .col(ColumnDef::new(ApiKeys::OwnerId).string_len(64))
                    .col(
                        ColumnDef::new(ApiKeys::RateLimitRpm)
                            .big_integer()
                            .not_null()
                            .default(60),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::RateLimitRpd)
                            .big_integer()
                            .not_null()
                            .default(10000),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::TokenLimit)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::ConcurrencyLimit)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::DailyCostLimit)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::WeeklyOpusCostLimit)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::RestrictModels)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ApiKeys::AllowedModels).text().not_null())
                    .col(
                        ColumnDef::new(ApiKeys::RestrictClients)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ApiKeys::AllowedClients).text().not_null())
                    .col(ColumnDef::new(ApiKeys::ActivatesAt).timestamp())
                    .col(ColumnDef::new(ApiKeys::ExpiresAt).timestamp())
                    .col(
                        ColumnDef::new(ApiKeys::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(ApiKeys::DeletedBy).string_len(255))
                    .col(ColumnDef::new(ApiKeys::DeletedAt).timestamp())
                    .col(ColumnDef::new(ApiKeys::LastUsedAt).timestamp())
                    .col(
                        ColumnDef::new(ApiKeys::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::UpdatedAt)
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
                    .name("idx_api_keys_owner_id")
                    .table(ApiKeys::Table)
                    .col(ApiKeys::OwnerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApiKeys::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ApiKeys {
    Table,
    Id,
    Name,
    Description,
    SecretHash,
    Preview,
    OwnerId,
    RateLimitRpm,
    RateLimitRpd,
    TokenLimit,
    ConcurrencyLimit,
    DailyCostLimit,
    WeeklyOpusCostLimit,
    RestrictModels,
    AllowedModels,
    RestrictClients,
    AllowedClients,
    ActivatesAt,
    ExpiresAt,
    Status,
    DeletedBy,
    DeletedAt,
    LastUsedAt,
    CreatedAt,
    UpdatedAt,
}
