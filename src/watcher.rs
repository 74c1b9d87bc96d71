//! 目录监听
//!
//! 把 notify 的创建事件（包括从目录外移入的文件）转发到 tokio 通道。
//! 只监听单层目录，不递归。

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// 事件通道容量
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// 开始监听目录，新建文件的路径发送到 `tx`
///
/// 返回的 watcher 被 drop 后停止监听。
pub fn watch_created(dir: &Path, tx: mpsc::Sender<PathBuf>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in created_files(event) {
                // 接收端已关闭说明监控已停止，丢弃即可
                let _ = tx.blocking_send(path);
            }
        }
        Err(e) => {
            tracing::warn!("⚠️ Watch error: {}", e);
        }
    })
    .map_err(|e| Error::WatchSetup(e.to_string()))?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::WatchSetup(format!("{}: {}", dir.display(), e)))?;

    tracing::info!("👁️ Watching directory: {:?}", dir);
    Ok(watcher)
}

/// 从事件中取出新出现的文件（忽略目录）
///
/// 移入目录的文件视同新建；`Both` 事件的路径为 [源, 目标]，只取目标。
fn created_files(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().last().into_iter().collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::DataChange;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_only_file_creations_are_forwarded() {
        let path = PathBuf::from("/tmp/Bose Updater-1.tmp");

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        assert_eq!(created_files(created), vec![path.clone()]);

        let any = Event::new(EventKind::Create(CreateKind::Any)).add_path(path.clone());
        assert_eq!(created_files(any), vec![path.clone()]);

        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path(path.clone());
        assert!(created_files(folder).is_empty());

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        assert!(created_files(modified).is_empty());
    }

    #[test]
    fn test_moved_in_files_are_forwarded() {
        let from = PathBuf::from("/tmp/staging.part");
        let to = PathBuf::from("/tmp/Bose Updater-2.tmp");

        let moved_to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(to.clone());
        assert_eq!(created_files(moved_to), vec![to.clone()]);

        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());
        assert_eq!(created_files(both), vec![to]);

        // 移出目录不算
        let moved_from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(from);
        assert!(created_files(moved_from).is_empty());
    }

    #[test]
    fn test_missing_directory_is_setup_error() {
        let tmp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let result = watch_created(&tmp.path().join("nope"), tx);
        assert!(matches!(result, Err(Error::WatchSetup(_))));
    }

    #[tokio::test]
    async fn test_created_file_is_delivered() {
        let tmp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _watcher = watch_created(tmp.path(), tx).unwrap();

        let path = tmp.path().join("new-file");
        std::fs::write(&path, b"data").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.file_name(), path.file_name());
    }
}
