//! 错误类型定义

use std::path::PathBuf;

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误（未选择固件、环境变量无效等）
    #[error("配置错误: {0}")]
    Config(String),

    /// 监控目录无法创建或无法监听
    #[error("监控启动失败: {0}")]
    WatchSetup(String),

    /// 已在监控中，拒绝重复启动
    #[error("监控已在运行")]
    AlreadyWatching,

    /// 复制固件失败
    #[error("复制出错 {target:?}: {reason}")]
    Copy {
        /// 目标文件
        target: PathBuf,
        /// 失败原因
        reason: String,
    },
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
