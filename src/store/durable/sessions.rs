use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, sea_query::OnConflict,
};

use entity::{oauth_sessions, sessions, sticky_sessions};

use super::{DurableStore, to_i64, to_u64};
use crate::error::Result;
use crate::store::traits::{SessionRepo, StickyRepo};
use crate::types::timezone::{from_millis, to_millis, to_naive};
use crate::types::{SessionKind, SessionRecord, StickySessionMapping};

// 两张会话表结构相同，用宏生成各自的读写
macro_rules! session_ops {
    ($table:ident, $db:expr, set, $record:expr) => {{
        let record: &SessionRecord = $record;
        let model = $table::ActiveModel {
            id: Set(record.id.clone()),
            data: Set(serde_json::to_string(&record.data)?),
            expires_at: Set(to_millis(record.expires_at)),
            created_at: Set(to_naive(Utc::now())),
        };
        $table::Entity::insert(model)
            .on_conflict(
                OnConflict::column($table::Column::Id)
                    .update_columns([$table::Column::Data, $table::Column::ExpiresAt])
                    .to_owned(),
            )
            .exec_without_returning($db)
            .await?;
        Ok(())
    }};
    ($table:ident, $db:expr, get, $id:expr) => {{
        let Some(model) = $table::Entity::find_by_id($id.to_string()).one($db).await? else {
            return Ok(None);
        };
        if model.expires_at <= Utc::now().timestamp_millis() {
            $table::Entity::delete_by_id(model.id).exec($db).await?;
            return Ok(None);
        }
        Ok(Some(SessionRecord {
            data: serde_json::from_str(&model.data)?,
            expires_at: from_millis(model.expires_at),
            id: model.id,
        }))
    }};
    ($table:ident, $db:expr, delete, $id:expr) => {{
        let result = $table::Entity::delete_by_id($id.to_string()).exec($db).await?;
        Ok(result.rows_affected > 0)
    }};
}

#[async_trait]
impl SessionRepo for DurableStore {
    async fn set_session(&self, kind: SessionKind, record: &SessionRecord) -> Result<()> {
        match kind {
            SessionKind::Login => session_ops!(sessions, &self.db, set, record),
            SessionKind::OAuth => session_ops!(oauth_sessions, &self.db, set, record),
        }
    }

    async fn get_session(&self, kind: SessionKind, id: &str) -> Result<Option<SessionRecord>> {
        match kind {
            SessionKind::Login => session_ops!(sessions, &self.db, get, id),
            SessionKind::OAuth => session_ops!(oauth_sessions, &self.db, get, id),
        }
    }

    async fn delete_session(&self, kind: SessionKind, id: &str) -> Result<bool> {
        match kind {
            SessionKind::Login => session_ops!(sessions, &self.db, delete, id),
            SessionKind::OAuth => session_ops!(oauth_sessions, &self.db, delete, id),
        }
    }
}

#[async_trait]
impl StickyRepo for DurableStore {
    async fn set_sticky(&self, mapping: &StickySessionMapping) -> Result<()> {
        let model = sticky_sessions::ActiveModel {
            fingerprint: Set(mapping.fingerprint.clone()),
            account_id: Set(mapping.account_id.clone()),
            account_type: Set(mapping.account_type.as_str().to_string()),
            ttl_secs: Set(to_i64(mapping.ttl_secs)),
            expires_at: Set(to_millis(mapping.expires_at)),
            created_at: Set(to_naive(Utc::now())),
        };
        sticky_sessions::Entity::insert(model)
            .on_conflict(
                OnConflict::column(sticky_sessions::Column::Fingerprint)
                    .update_columns([
                        sticky_sessions::Column::AccountId,
                        sticky_sessions::Column::AccountType,
                        sticky_sessions::Column::TtlSecs,
                        sticky_sessions::Column::ExpiresAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn get_sticky(&self, fingerprint: &str) -> Result<Option<StickySessionMapping>> {
        let Some(model) = sticky_sessions::Entity::find_by_id(fingerprint.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        if model.expires_at <= Utc::now().timestamp_millis() {
            sticky_sessions::Entity::delete_by_id(model.fingerprint)
                .exec(&self.db)
                .await?;
            return Ok(None);
        }

        Ok(Some(StickySessionMapping {
            account_type: model.account_type.parse().unwrap_or_default(),
            ttl_secs: to_u64(model.ttl_secs),
            expires_at: from_millis(model.expires_at),
            fingerprint: model.fingerprint,
            account_id: model.account_id,
        }))
    }

    async fn touch_sticky(&self, fingerprint: &str) -> Result<bool> {
        let Some(mapping) = self.get_sticky(fingerprint).await? else {
            return Ok(false);
        };
        let expires_at = Utc::now().timestamp_millis() + to_i64(mapping.ttl_secs).saturating_mul(1000);
        let result = sticky_sessions::Entity::update_many()
            .col_expr(
                sticky_sessions::Column::ExpiresAt,
                sea_orm::sea_query::Expr::value(expires_at),
            )
            .filter(sticky_sessions::Column::Fingerprint.eq(fingerprint))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_sticky(&self, fingerprint: &str) -> Result<bool> {
        let result = sticky_sessions::Entity::delete_by_id(fingerprint.to_string())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
