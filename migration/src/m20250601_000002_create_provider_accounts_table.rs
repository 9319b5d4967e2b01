use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProviderAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProviderAccounts::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProviderAccounts::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProviderAccounts::Provider)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProviderAccounts::CredentialsSealed).text())
                    .col(
                        ColumnDef::new(ProviderAccounts::Status)
                            .string_len(32)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(ProviderAccounts::Priority)
                            .integer()
                            .not_null()
                            .default(50),
                    )
                    .col(
                        ColumnDef::new(ProviderAccounts::Schedulable)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ProviderAccounts::AccountType)
                            .string_len(16)
                            .not_null()
                            .default("shared"),
                    )
                    .col(ColumnDef::new(ProviderAccounts::Proxy).string_len(512))
                    .col(ColumnDef::new(ProviderAccounts::Extra).text().not_null())
                    .col(ColumnDef::new(ProviderAccounts::ExpiresAt).timestamp())
                    .col(ColumnDef::new(ProviderAccounts::LastRefreshedAt).timestamp())
                    .col(
                        ColumnDef::new(ProviderAccounts::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProviderAccounts::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 按服务商 + 调度优先级列出账号
        manager
            .create_index(
                Index::create()
                    .name("idx_provider_accounts_provider_priority")
                    .table(ProviderAccounts::Table)
                    .col(ProviderAccounts::Provider)
                    .col(ProviderAccounts::Priority)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProviderAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProviderAccounts {
    Table,
    Id,
    Name,
    Provider,
    CredentialsSealed,
    Status,
    Priority,
    Schedulable,
    AccountType,
    Proxy,
    Extra,
    ExpiresAt,
    LastRefreshedAt,
    CreatedAt,
    UpdatedAt,
}
