//! 文件稳定检测
//!
//! 周期性读取文件大小：相邻两次读取相同且大于 0，即认为写入完成。
//! 文件尚不可见（刚创建、还无法 stat）时按“未稳定”处理，下一轮重试。

use std::path::Path;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::SettleConfig;

/// 稳定检测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// 文件大小已稳定
    Stable(u64),
    /// 超过等待上限仍未稳定
    TimedOut,
    /// 等待期间被取消
    Cancelled,
}

/// 文件稳定检测器
#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityDetector {
    config: SettleConfig,
}

impl StabilityDetector {
    pub fn new(config: SettleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SettleConfig {
        self.config
    }

    /// 等待文件写入完成
    pub async fn await_stable(&self, path: &Path, cancel: &CancellationToken) -> Settle {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);

        loop {
            if cancel.is_cancelled() {
                return Settle::Cancelled;
            }

            let before = current_size(path).await;

            tokio::select! {
                _ = cancel.cancelled() => return Settle::Cancelled,
                _ = sleep(self.config.poll_interval) => {}
            }

            let after = current_size(path).await;

            match (before, after) {
                (Some(a), Some(b)) if a == b && a > 0 => {
                    tracing::debug!("✅ {:?} settled at {} bytes", path.file_name(), a);
                    return Settle::Stable(a);
                }
                (Some(a), Some(b)) if a != b => {
                    tracing::trace!("{:?} still growing: {} → {}", path.file_name(), a, b);
                }
                _ => {}
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(
                        "⏰ {:?} did not settle within {:?}",
                        path.file_name(),
                        self.config.timeout
                    );
                    return Settle::TimedOut;
                }
            }
        }
    }
}

/// 读取文件大小；无法读取时返回 None
async fn current_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Some(meta.len()),
        Err(e) => {
            tracing::trace!("{:?} not visible yet: {}", path.file_name(), e);
            None
        }
    }
}
