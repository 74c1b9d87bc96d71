//! 状态通知
//!
//! 维护订阅列表，把状态消息推送给外壳（命令行、界面），同时写入日志。
//! 通知只做实时推送，不落盘。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// 每个订阅者的通道容量
pub const SUBSCRIBER_CAPACITY: usize = 256;

/// 通知内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// 已选择固件文件
    PayloadSelected { path: PathBuf },
    /// 未选择固件，或选择的文件不存在
    PayloadMissing { path: Option<PathBuf> },
    /// 开始监控目录
    WatchStarted { directory: PathBuf },
    /// 停止监控
    WatchStopped { directory: PathBuf },
    /// 无法开始监控
    WatchFailed { directory: PathBuf, reason: String },
    /// 检测到匹配前缀的新文件
    FileDetected { path: PathBuf },
    /// 固件已复制到目标
    CopySucceeded { target: PathBuf, bytes: u64 },
    /// 复制失败
    CopyFailed { target: PathBuf, reason: String },
    /// 等待文件稳定超时或被取消，放弃复制
    SettleAbandoned { target: PathBuf, reason: String },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::PayloadSelected { path } => {
                write!(f, "已选择固件文件: {}", path.display())
            }
            Notification::PayloadMissing { path: Some(path) } => {
                write!(f, "选择的固件文件不存在: {}", path.display())
            }
            Notification::PayloadMissing { path: None } => write!(f, "请先选择固件文件"),
            Notification::WatchStarted { directory } => {
                write!(f, "开始监控目录: {}", directory.display())
            }
            Notification::WatchStopped { directory } => {
                write!(f, "停止监控目录: {}", directory.display())
            }
            Notification::WatchFailed { directory, reason } => {
                write!(f, "无法监控目录 {}: {}", directory.display(), reason)
            }
            Notification::FileDetected { path } => {
                let name = path.file_name().unwrap_or(path.as_os_str());
                write!(f, "检测到文件: {}", name.to_string_lossy())
            }
            Notification::CopySucceeded { target, .. } => {
                write!(f, "固件已复制到: {}", target.display())
            }
            Notification::CopyFailed { reason, .. } => write!(f, "复制出错: {}", reason),
            Notification::SettleAbandoned { target, reason } => {
                write!(f, "放弃复制 {}: {}", target.display(), reason)
            }
        }
    }
}

impl Notification {
    /// 是否是警告/错误类通知
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            Notification::PayloadMissing { .. }
                | Notification::WatchFailed { .. }
                | Notification::CopyFailed { .. }
                | Notification::SettleAbandoned { .. }
        )
    }
}

/// 带时间戳的通知（推送给订阅者的单位）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusLine {
    pub at: DateTime<Local>,
    #[serde(flatten)]
    pub notification: Notification,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.notification)
    }
}

/// 通知广播器
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: RwLock<Vec<mpsc::Sender<StatusLine>>>,
}

impl Notifier {
    /// 创建新的广播器
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 订阅状态通知
    pub fn subscribe(&self) -> mpsc::Receiver<StatusLine> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.write().push(tx);
        tracing::debug!("📡 Subscriber registered ({} total)", self.subscriber_count());
        rx
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// 推送通知（非阻塞，fire-and-forget）
    pub fn notify(&self, notification: Notification) {
        if notification.is_problem() {
            tracing::warn!("{}", notification);
        } else {
            tracing::info!("{}", notification);
        }

        let line = StatusLine {
            at: Local::now(),
            notification,
        };

        let mut closed = false;
        for sender in self.subscribers.read().iter() {
            match sender.try_send(line.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("📡 Subscriber channel full, dropping status line");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
            }
        }

        if closed {
            self.subscribers.write().retain(|s| !s.is_closed());
            tracing::debug!("📡 Pruned closed subscribers");
        }
    }
}
