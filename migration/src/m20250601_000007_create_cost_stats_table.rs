use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CostStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CostStats::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CostStats::PrincipalId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CostStats::PrincipalType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CostStats::Period).string_len(16).not_null())
                    .col(ColumnDef::new(CostStats::Bucket).string_len(16).not_null())
                    .col(
                        ColumnDef::new(CostStats::Amount)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(CostStats::UpdatedAt)
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
                    .name("uk_cost_stats_bucket")
                    .table(CostStats::Table)
                    .col(CostStats::PrincipalId)
                    .col(CostStats::PrincipalType)
                    .col(CostStats::Period)
                    .col(CostStats::Bucket)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CostStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CostStats {
    Table,
    Id,
    PrincipalId,
    PrincipalType,
    Period,
    Bucket,
    Amount,
    UpdatedAt,
}
