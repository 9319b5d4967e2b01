use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::{ActiveValue::Set, EntityTrait, Iterable, QueryOrder, sea_query::OnConflict};

use entity::provider_accounts::{self, Column, Entity};

use super::DurableStore;
use crate::error::Result;
use crate::store::codec::{open_credentials, seal_credentials};
use crate::store::traits::AccountRepo;
use crate::types::timezone::{from_naive, to_naive};
use crate::types::ProviderAccountRecord;

impl DurableStore {
    fn account_from_model(&self, model: provider_accounts::Model) -> Result<ProviderAccountRecord> {
        let extra: BTreeMap<String, serde_json::Value> = if model.extra.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&model.extra)?
        };

        let mut record = ProviderAccountRecord {
            provider: model.provider.parse()?,
            credentials: None,
            sealed_credentials: None,
            status: model.status.parse().unwrap_or_default(),
            priority: model.priority,
            schedulable: model.schedulable,
            account_type: model.account_type.parse().unwrap_or_default(),
            proxy: model.proxy,
            extra,
            expires_at: model.expires_at.map(from_naive),
            last_refreshed_at: model.last_refreshed_at.map(from_naive),
            created_at: from_naive(model.created_at),
            updated_at: from_naive(model.updated_at),
            id: model.id,
            name: model.name,
        };
        open_credentials(self.cipher(), &mut record, model.credentials_sealed);
        Ok(record)
    }

    fn account_to_active(
        &self,
        record: &ProviderAccountRecord,
    ) -> Result<provider_accounts::ActiveModel> {
        let credentials_sealed = seal_credentials(self.cipher(), record)?;

        Ok(provider_accounts::ActiveModel {
            id: Set(record.id.clone()),
            name: Set(record.name.clone()),
            provider: Set(record.provider.as_str().to_string()),
            credentials_sealed: Set(credentials_sealed),
            status: Set(record.status.as_str().to_string()),
            priority: Set(record.priority),
            schedulable: Set(record.schedulable),
            account_type: Set(record.account_type.as_str().to_string()),
            proxy: Set(record.proxy.clone()),
            extra: Set(serde_json::to_string(&record.extra)?),
            expires_at: Set(record.expires_at.map(to_naive)),
            last_refreshed_at: Set(record.last_refreshed_at.map(to_naive)),
            created_at: Set(to_naive(record.created_at)),
            updated_at: Set(to_naive(record.updated_at)),
        })
    }
}

#[async_trait]
impl AccountRepo for DurableStore {
    async fn get_account(&self, id: &str) -> Result<Option<ProviderAccountRecord>> {
        Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(|m| self.account_from_model(m))
            .transpose()
    }

    async fn upsert_account(&self, record: &ProviderAccountRecord) -> Result<()> {
        record.validate()?;
        Entity::insert(self.account_to_active(record)?)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns(
                        Column::iter().filter(|c| !matches!(c, Column::Id | Column::CreatedAt)),
                    )
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<bool> {
        let result = Entity::delete_by_id(id.to_string()).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn list_accounts(&self) -> Result<Vec<ProviderAccountRecord>> {
        Entity::find()
            .order_by_desc(Column::Priority)
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| self.account_from_model(m))
            .collect()
    }
}
