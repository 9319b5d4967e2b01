//! # 计数器镜像队列
//!
//! 混合模式下使用量与费用先写临时存储，再经有界队列异步写入持久存储。
//! 队列满或写入失败只记录告警并丢弃，不影响请求路径。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::durable::DurableStore;
use super::traits::{CostRepo, UsageRepo};
use crate::error::{Result, StoreError};
use crate::types::{CostIncrement, UsageIncrement};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

#[derive(Debug)]
enum MirrorCommand {
    Usage(UsageIncrement),
    Cost(CostIncrement),
    /// 之前入队的命令全部处理完后应答
    Flush(oneshot::Sender<()>),
}

/// 镜像队列句柄
#[derive(Debug)]
pub struct MirrorQueue {
    sender: mpsc::Sender<MirrorCommand>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
}

impl MirrorQueue {
    /// 启动后台写入任务
    #[must_use]
    pub fn spawn(target: Arc<DurableStore>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(run(target, receiver, cancel.clone(), dropped.clone()));

        Self {
            sender,
            cancel,
            worker: Mutex::new(Some(worker)),
            dropped,
        }
    }

    pub fn enqueue_usage(&self, increment: UsageIncrement) {
        self.enqueue(MirrorCommand::Usage(increment));
    }

    pub fn enqueue_cost(&self, increment: CostIncrement) {
        self.enqueue(MirrorCommand::Cost(increment));
    }

    fn enqueue(&self, command: MirrorCommand) {
        if let Err(e) = self.sender.try_send(command) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue_full",
                mpsc::error::TrySendError::Closed(_) => "queue_closed",
            };
            lwarn!(
                "system",
                LogStage::Mirror,
                LogComponent::Mirror,
                "mirror_dropped",
                "计数器镜像队列不可用，本次增量丢弃",
                reason = reason,
                dropped_total = total
            );
        }
    }

    /// 累计丢弃的增量数（入队失败与写入失败）
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 等待已入队的增量全部写入
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MirrorCommand::Flush(tx))
            .await
            .map_err(|_| StoreError::internal("镜像任务已停止"))?;
        rx.await
            .map_err(|_| StoreError::internal("镜像任务在刷新前退出"))
    }

    /// 排空队列后停止后台任务，可重复调用
    pub async fn shutdown(&self) -> Result<()> {
        let Some(worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        let flushed = self.flush().await;
        self.cancel.cancel();
        if let Err(e) = worker.await {
            lwarn!(
                "system",
                LogStage::Shutdown,
                LogComponent::Mirror,
                "mirror_join_failed",
                &format!("镜像任务异常退出: {e}")
            );
        }
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Mirror,
            "mirror_stopped",
            "计数器镜像任务已停止",
            dropped_total = self.dropped()
        );
        flushed
    }
}

async fn run(
    target: Arc<DurableStore>,
    mut receiver: mpsc::Receiver<MirrorCommand>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
) {
    ldebug!(
        "system",
        LogStage::Startup,
        LogComponent::Mirror,
        "mirror_started",
        "计数器镜像任务已启动"
    );

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = receiver.recv() => match command {
                Some(command) => apply(&target, command, &dropped).await,
                None => break,
            },
        }
    }

    // 取消后把剩余命令写完
    receiver.close();
    while let Ok(command) = receiver.try_recv() {
        apply(&target, command, &dropped).await;
    }
}

async fn apply(target: &DurableStore, command: MirrorCommand, dropped: &AtomicU64) {
    let (result, kind) = match command {
        MirrorCommand::Usage(increment) => (target.increment_usage(&increment).await, "usage"),
        MirrorCommand::Cost(increment) => (target.increment_cost(&increment).await, "cost"),
        MirrorCommand::Flush(done) => {
            let _ = done.send(());
            return;
        }
    };

    if let Err(e) = result {
        dropped.fetch_add(1, Ordering::Relaxed);
        lwarn!(
            "system",
            LogStage::Mirror,
            LogComponent::Mirror,
            "mirror_write_failed",
            &format!("计数器镜像写入失败: {e}"),
            kind = kind
        );
    }
}
