//! # relay-store 管理工具
//!
//! 迁移、状态检查、过期清理与计数器重置

use clap::{Parser, Subcommand};
use relay_store::{
    Result, StoreError,
    app::StorageContext,
    config::{ConfigManager, SecretCipher},
    database::{check_database_status, init_database, run_migrations},
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
};

/// relay-store 管理命令
#[derive(Parser, Debug)]
#[command(name = "relay-store")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 配置文件路径，默认按 RUST_ENV 选择 config/config.<env>.toml
    #[arg(short, long, env = "RELAY_STORE_CONFIG")]
    config: Option<String>,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行数据库迁移
    Migrate,
    /// 检查存储连通性并输出概览
    Status,
    /// 删除过期的会话、映射、租约和明细
    Cleanup,
    /// 清空全部使用量与费用计数器
    ResetUsage {
        /// 确认执行，不可恢复
        #[arg(long)]
        confirm: bool,
    },
    /// 生成新的 64 位十六进制加密密钥
    GenKey,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(Some(&cli.log_level));

    if let Err(e) = run(cli).await {
        lerror!(
            "system",
            LogStage::Internal,
            LogComponent::Main,
            "command_failed",
            &format!("命令执行失败: {e}")
        );
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if matches!(cli.command, Command::GenKey) {
        println!("{}", SecretCipher::generate_key());
        return Ok(());
    }

    let manager = match &cli.config {
        Some(path) => ConfigManager::from_file(path)?,
        None => ConfigManager::new()?,
    };
    let config = manager.into_config();

    match cli.command {
        Command::Migrate => {
            let db = init_database(&config.database).await?;
            let pending = check_database_status(&db).await?;
            run_migrations(&db).await?;
            linfo!(
                "system",
                LogStage::Db,
                LogComponent::Database,
                "migrate_done",
                "迁移完成",
                applied = pending
            );
        }
        Command::Status => {
            let context = StorageContext::connect(config).await?;
            let store = context.store();
            store.ping().await?;
            let stats = store.system_stats().await?;
            print_json(&serde_json::json!({
                "mode": context.config().storage.mode.to_string(),
                "store": store.name(),
                "stats": stats,
            }))?;
            context.shutdown().await?;
        }
        Command::Cleanup => {
            let context = StorageContext::connect(config).await?;
            let report = context.store().cleanup().await?;
            print_json(&report)?;
            context.shutdown().await?;
        }
        Command::ResetUsage { confirm } => {
            if !confirm {
                return Err(StoreError::validation(
                    "重置会清空全部使用量统计，请加 --confirm 确认",
                ));
            }
            let context = StorageContext::connect(config).await?;
            let removed = context.store().reset_all_usage_stats().await?;
            linfo!(
                "system",
                LogStage::Metering,
                LogComponent::Usage,
                "reset_usage",
                "使用量统计已清空",
                removed = removed
            );
            context.shutdown().await?;
        }
        Command::GenKey => {}
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
