//! 固件复制
//!
//! 用固件内容整体覆盖目标文件。每次尝试恰好推送一条通知（成功或失败），失败不重试。

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::error::{Error, Result};
use crate::notifier::{Notification, Notifier};

/// 一次待执行的复制（每个检测到的文件一个，由处理它的任务独占）
#[derive(Debug, Clone)]
pub struct PendingCopy {
    /// 被覆盖的文件
    pub target: PathBuf,
    /// 派发时读取的固件路径快照
    pub payload: PathBuf,
    /// 检测到文件的时间
    pub detected_at: DateTime<Local>,
}

impl PendingCopy {
    pub fn new(target: PathBuf, payload: PathBuf) -> Self {
        Self {
            target,
            payload,
            detected_at: Local::now(),
        }
    }
}

/// 复制协调器
#[derive(Debug, Clone)]
pub struct CopyCoordinator {
    notifier: Arc<Notifier>,
}

impl CopyCoordinator {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }

    /// 用固件覆盖目标文件，返回写入的字节数
    pub async fn copy_into(&self, pending: &PendingCopy) -> Result<u64> {
        match tokio::fs::copy(&pending.payload, &pending.target).await {
            Ok(bytes) => {
                tracing::debug!(
                    "📦 {:?} → {:?} ({} bytes, {}ms after detection)",
                    pending.payload.file_name(),
                    pending.target.file_name(),
                    bytes,
                    (Local::now() - pending.detected_at).num_milliseconds()
                );
                self.notifier.notify(Notification::CopySucceeded {
                    target: pending.target.clone(),
                    bytes,
                });
                Ok(bytes)
            }
            Err(e) => {
                let reason = e.to_string();
                self.notifier.notify(Notification::CopyFailed {
                    target: pending.target.clone(),
                    reason: reason.clone(),
                });
                Err(Error::Copy {
                    target: pending.target.clone(),
                    reason,
                })
            }
        }
    }
}
