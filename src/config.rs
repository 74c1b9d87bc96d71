//! 监控配置

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// 默认文件名前缀
pub const DEFAULT_PREFIX: &str = "Bose Updater";

/// 默认轮询间隔（毫秒）
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// 默认最大并发复制数
pub const DEFAULT_MAX_CONCURRENT_COPIES: usize = 8;

/// 停止监控时如何处理尚未完成的任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopPolicy {
    /// 已派发的任务继续执行直到完成
    #[default]
    Drain,
    /// 仍在等待文件稳定的任务被放弃；已开始的复制总会完成
    CancelPending,
}

/// 文件稳定检测参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleConfig {
    /// 两次读取大小之间的间隔
    pub poll_interval: Duration,
    /// 等待稳定的上限，None 表示一直等待
    pub timeout: Option<Duration>,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: None,
        }
    }
}

/// 监控配置
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// 监控目录（非递归）
    pub directory: PathBuf,
    /// 文件名前缀
    pub prefix: String,
    /// 初始选择的固件文件
    pub payload: Option<PathBuf>,
    /// 稳定检测参数
    pub settle: SettleConfig,
    /// 同时进行的 稳定检测+复制 任务上限
    pub max_concurrent_copies: usize,
    /// 停止策略
    pub stop_policy: StopPolicy,
}

impl WatchConfig {
    /// 监控指定目录，其余使用默认值
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// 设置文件名前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// 设置初始固件文件
    pub fn with_payload<P: Into<PathBuf>>(mut self, payload: P) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// 设置稳定检测参数
    pub fn with_settle(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// 设置停止策略
    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    /// 从环境变量或默认值创建配置
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("FIRMWARE_MONITOR_DIR") {
            config.directory = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("FIRMWARE_MONITOR_PREFIX") {
            config.prefix = prefix;
        }
        if let Ok(payload) = std::env::var("FIRMWARE_MONITOR_PAYLOAD") {
            if !payload.is_empty() {
                config.payload = Some(PathBuf::from(payload));
            }
        }
        if let Some(ms) = env_number::<u64>("FIRMWARE_MONITOR_POLL_MS")? {
            config.settle.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = env_number::<u64>("FIRMWARE_MONITOR_TIMEOUT_SECS")? {
            // 0 表示不限时
            config.settle.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(n) = env_number::<usize>("FIRMWARE_MONITOR_MAX_COPIES")? {
            config.max_concurrent_copies = n;
        }

        Ok(config)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            prefix: DEFAULT_PREFIX.to_string(),
            payload: None,
            settle: SettleConfig::default(),
            max_concurrent_copies: DEFAULT_MAX_CONCURRENT_COPIES,
            stop_policy: StopPolicy::Drain,
        }
    }
}

/// 默认监控目录: %TEMP%，否则系统临时目录
pub fn default_directory() -> PathBuf {
    std::env::var_os("TEMP")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} 的值无效: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.prefix, "Bose Updater");
        assert!(config.payload.is_none());
        assert_eq!(config.settle.poll_interval, Duration::from_millis(500));
        assert!(config.settle.timeout.is_none());
        assert_eq!(config.stop_policy, StopPolicy::Drain);
        assert!(config.max_concurrent_copies > 0);
    }

    #[test]
    fn test_builder() {
        let config = WatchConfig::new("/tmp/watch")
            .with_prefix("Updater")
            .with_payload("/tmp/fw.bin")
            .with_stop_policy(StopPolicy::CancelPending);

        assert_eq!(config.directory, PathBuf::from("/tmp/watch"));
        assert_eq!(config.prefix, "Updater");
        assert_eq!(config.payload, Some(PathBuf::from("/tmp/fw.bin")));
        assert_eq!(config.stop_policy, StopPolicy::CancelPending);
    }

    #[test]
    fn test_env_number_rejects_garbage() {
        // 变量名只在本测试中使用，避免与其他测试互相干扰
        std::env::set_var("FIRMWARE_MONITOR_TEST_NUMBER", "abc");
        let result = env_number::<u64>("FIRMWARE_MONITOR_TEST_NUMBER");
        assert!(matches!(result, Err(Error::Config(_))));

        std::env::set_var("FIRMWARE_MONITOR_TEST_NUMBER", " 42 ");
        assert_eq!(env_number::<u64>("FIRMWARE_MONITOR_TEST_NUMBER").unwrap(), Some(42));

        std::env::remove_var("FIRMWARE_MONITOR_TEST_NUMBER");
        assert_eq!(env_number::<u64>("FIRMWARE_MONITOR_TEST_NUMBER").unwrap(), None);
    }
}
