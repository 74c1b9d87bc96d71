//! firmware-monitor - 固件替换监控
//!
//! 监控目录中新创建的、文件名以指定前缀开头的文件（默认 `Bose Updater`），
//! 等文件写入完成（大小稳定）后，用事先选择的固件文件覆盖它。
//!
//! # 核心组件
//!
//! - **StabilityDetector**: 轮询文件大小，判断写入是否完成
//! - **CopyCoordinator**: 用固件覆盖目标文件并报告结果
//! - **WatchSession**: 单目录监控，前缀过滤，为每个匹配文件派发独立任务
//! - **Notifier**: 把状态消息推送给外壳（命令行/界面）
//!
//! # 并发模型
//!
//! 每个匹配文件一个 tokio 任务，互不共享可变状态；并发数受信号量限制。
//! 固件路径在派发时快照，之后切换固件不影响进行中的任务。

pub mod config;
pub mod copier;
pub mod error;
pub mod notifier;
pub mod payload;
pub mod session;
pub mod stability;
pub mod watcher;

// Re-exports
pub use config::{SettleConfig, StopPolicy, WatchConfig, DEFAULT_PREFIX};
pub use copier::{CopyCoordinator, PendingCopy};
pub use error::{Error, Result};
pub use notifier::{Notification, Notifier, StatusLine};
pub use payload::PayloadSelection;
pub use session::{matches_prefix, SessionStatus, WatchSession};
pub use stability::{Settle, StabilityDetector};

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
