//! 后台任务：定期清理过期数据、回收闲置限流器

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::SharedStore;
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 后台任务集合，共用一个取消令牌
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 派生的子令牌，随整体一起取消
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    pub async fn task_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// 周期性调用 `cleanup()`
    pub async fn spawn_store_cleanup(&self, store: SharedStore, interval: Duration) {
        let cancel = self.child_token();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => match store.cleanup().await {
                        Ok(report) => ldebug!(
                            "system",
                            LogStage::Cleanup,
                            LogComponent::Database,
                            "periodic_cleanup",
                            "定期清理完成",
                            removed = report.total()
                        ),
                        Err(e) => lwarn!(
                            "system",
                            LogStage::Cleanup,
                            LogComponent::Database,
                            "periodic_cleanup_failed",
                            &format!("定期清理失败: {e}")
                        ),
                    },
                }
            }
        });
        self.register(handle).await;
    }

    /// 取消并等待全部任务退出
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                lwarn!(
                    "system",
                    LogStage::Shutdown,
                    LogComponent::Main,
                    "task_join_failed",
                    &format!("后台任务异常退出: {e}")
                );
            }
        }
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "tasks_stopped",
            "后台任务已停止",
            count = count
        );
    }
}
