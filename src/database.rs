//! # 数据库模块
//!
//! 数据库连接和迁移管理

use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::config::DatabaseConfig;
use crate::error::{Context, Result};
use crate::{
    ldebug, lerror, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 初始化数据库连接
///
/// SQLite 文件库会先创建所在目录；内存库强制单连接。
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "connect_database",
        "正在连接数据库",
        backend = config.url.split(':').next().unwrap_or("unknown")
    );

    config.ensure_database_path()?;
    let db = Database::connect(config.connect_options()?)
        .await
        .context("数据库连接失败")?;

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "database_connected",
        "数据库连接成功"
    );
    Ok(db)
}

/// 运行数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    ldebug!(
        "system",
        LogStage::Startup,
        LogComponent::Database,
        "run_migrations",
        "开始运行数据库迁移"
    );

    match ::migration::Migrator::up(db, None).await {
        Ok(()) => {
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_done",
                "数据库迁移完成"
            );
            Ok(())
        }
        Err(e) => {
            lerror!(
                "system",
                LogStage::Startup,
                LogComponent::Database,
                "migrations_failed",
                &format!("数据库迁移失败: {e}")
            );
            Err(e.into())
        }
    }
}

/// 检查待应用的迁移数
pub async fn check_database_status(db: &DatabaseConnection) -> Result<usize> {
    let pending = ::migration::Migrator::get_pending_migrations(db)
        .await?
        .len();

    if pending == 0 {
        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "migration_status",
            "所有迁移都已应用"
        );
    } else {
        lwarn!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "migration_status",
            "存在待应用的迁移",
            pending = pending
        );
    }
    Ok(pending)
}
