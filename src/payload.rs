//! 固件选择
//!
//! 当前选择的固件路径可以随时切换；每个复制任务在派发时读取一次（快照），
//! 之后的切换不会影响已在进行中的任务。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// 当前选择的固件（可跨任务共享的句柄）
#[derive(Debug, Clone, Default)]
pub struct PayloadSelection {
    inner: Arc<RwLock<Option<PathBuf>>>,
}

impl PayloadSelection {
    /// 以给定初始值创建
    pub fn new(initial: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// 选择固件文件；文件不存在或不是普通文件时清空选择
    pub fn select(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        match validate(path) {
            Ok(()) => {
                let path = path.to_path_buf();
                *self.inner.write() = Some(path.clone());
                Ok(path)
            }
            Err(e) => {
                *self.inner.write() = None;
                Err(e)
            }
        }
    }

    /// 清空选择
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// 读取当前选择
    pub fn snapshot(&self) -> Option<PathBuf> {
        self.inner.read().clone()
    }

    /// 读取当前选择，并确认文件仍然存在
    pub fn require(&self) -> Result<PathBuf> {
        let path = self
            .snapshot()
            .ok_or_else(|| Error::Config("未选择固件文件".to_string()))?;
        validate(&path)?;
        Ok(path)
    }
}

fn validate(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(Error::Config(format!("不是文件: {}", path.display()))),
        Err(e) => Err(Error::Config(format!(
            "固件文件不可用 {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_select_existing_file() {
        let tmp = TempDir::new().unwrap();
        let fw = tmp.path().join("a.bin");
        std::fs::write(&fw, b"firmware").unwrap();

        let selection = PayloadSelection::default();
        assert!(selection.snapshot().is_none());

        let selected = selection.select(&fw).unwrap();
        assert_eq!(selected, fw);
        assert_eq!(selection.require().unwrap(), fw);
    }

    #[test]
    fn test_select_missing_clears_selection() {
        let tmp = TempDir::new().unwrap();
        let fw = tmp.path().join("a.bin");
        std::fs::write(&fw, b"firmware").unwrap();

        let selection = PayloadSelection::new(Some(fw));
        let result = selection.select(tmp.path().join("missing.bin"));
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(selection.snapshot().is_none());
    }

    #[test]
    fn test_directory_is_not_a_payload() {
        let tmp = TempDir::new().unwrap();
        let selection = PayloadSelection::default();
        assert!(selection.select(tmp.path()).is_err());
    }

    #[test]
    fn test_require_detects_deleted_payload() {
        let tmp = TempDir::new().unwrap();
        let fw = tmp.path().join("a.bin");
        std::fs::write(&fw, b"firmware").unwrap();

        let selection = PayloadSelection::default();
        selection.select(&fw).unwrap();
        std::fs::remove_file(&fw).unwrap();

        assert!(matches!(selection.require(), Err(Error::Config(_))));
        // 选择本身保持不变，由调用方决定是否清空
        assert_eq!(selection.snapshot(), Some(fw));
    }

    #[test]
    fn test_clones_share_selection() {
        let tmp = TempDir::new().unwrap();
        let fw = tmp.path().join("a.bin");
        std::fs::write(&fw, b"firmware").unwrap();

        let selection = PayloadSelection::default();
        let handle = selection.clone();
        handle.select(&fw).unwrap();
        assert_eq!(selection.snapshot(), Some(fw));

        selection.clear();
        assert!(handle.snapshot().is_none());
    }
}
