//! 监控会话
//!
//! 状态机：`Idle` ⇄ `Watching`。
//!
//! - `start`: 需要已选择且存在的固件；创建目录并开始接收创建事件
//! - 创建事件: 文件名匹配前缀时派发独立的 稳定检测 → 复制 任务，不阻塞事件循环
//! - `stop`: 立即停止接收事件；已派发的任务按 [`StopPolicy`] 处理
//!
//! 单个任务失败只影响它自己，不改变会话状态。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{StopPolicy, WatchConfig};
use crate::copier::{CopyCoordinator, PendingCopy};
use crate::error::{Error, Result};
use crate::notifier::{Notification, Notifier};
use crate::payload::PayloadSelection;
use crate::stability::{Settle, StabilityDetector};
use crate::watcher::{watch_created, EVENT_CHANNEL_CAPACITY};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Watching,
}

/// 文件名是否以前缀开头
pub fn matches_prefix(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(prefix))
        .unwrap_or(false)
}

enum State {
    Idle,
    Watching(Active),
}

/// 一次 start → stop 期间的运行资源
struct Active {
    /// 停止接收事件
    shutdown: CancellationToken,
    /// 放弃仍在等待稳定的任务（仅 CancelPending 时触发）
    pending: CancellationToken,
    dispatch: JoinHandle<()>,
}

/// 派发器：前缀过滤 + 快照固件 + 生成任务
struct Dispatcher {
    prefix: String,
    payload: PayloadSelection,
    notifier: Arc<Notifier>,
    detector: StabilityDetector,
    copier: CopyCoordinator,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    spawned: AtomicU64,
}

impl Dispatcher {
    /// 处理一个创建事件，返回是否派发了任务
    fn dispatch(&self, path: PathBuf, pending: &CancellationToken) -> bool {
        if !matches_prefix(&path, &self.prefix) {
            tracing::trace!("Ignoring {:?} (prefix mismatch)", path.file_name());
            return false;
        }

        // 快照：之后切换固件不影响这个任务
        let Some(payload) = self.payload.snapshot() else {
            self.notifier.notify(Notification::PayloadMissing { path: None });
            return false;
        };

        self.notifier.notify(Notification::FileDetected { path: path.clone() });
        self.spawned.fetch_add(1, Ordering::Relaxed);

        let job = PendingCopy::new(path, payload);
        let detector = self.detector;
        let copier = self.copier.clone();
        let notifier = self.notifier.clone();
        let permits = self.permits.clone();
        let cancel = pending.clone();

        self.tracker.spawn(async move {
            run_pending(job, detector, copier, notifier, permits, cancel).await;
        });
        true
    }
}

/// 单个文件的 稳定检测 → 复制 流程
async fn run_pending(
    job: PendingCopy,
    detector: StabilityDetector,
    copier: CopyCoordinator,
    notifier: Arc<Notifier>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    match detector.await_stable(&job.target, &cancel).await {
        Settle::Stable(size) => {
            tracing::debug!("📝 {:?} finished writing ({} bytes)", job.target.file_name(), size);
            // 名额只限制复制本身，未稳定的文件不占名额
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            // 复制一旦开始就不再响应取消
            if let Err(e) = copier.copy_into(&job).await {
                tracing::debug!("Copy task ended with error: {}", e);
            }
        }
        Settle::TimedOut => {
            notifier.notify(Notification::SettleAbandoned {
                target: job.target,
                reason: format!(
                    "等待写入完成超时 ({:?})",
                    detector.config().timeout.unwrap_or_default()
                ),
            });
        }
        Settle::Cancelled => {
            notifier.notify(Notification::SettleAbandoned {
                target: job.target,
                reason: "监控已停止".to_string(),
            });
        }
    }
}

/// 监控会话
pub struct WatchSession {
    directory: PathBuf,
    stop_policy: StopPolicy,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<State>,
}

impl WatchSession {
    /// 创建会话（初始为 Idle）
    pub fn new(config: WatchConfig, notifier: Arc<Notifier>) -> Self {
        let payload = PayloadSelection::new(config.payload.clone());
        let dispatcher = Dispatcher {
            prefix: config.prefix.clone(),
            payload,
            notifier: notifier.clone(),
            detector: StabilityDetector::new(config.settle),
            copier: CopyCoordinator::new(notifier),
            permits: Arc::new(Semaphore::new(config.max_concurrent_copies.max(1))),
            tracker: TaskTracker::new(),
            spawned: AtomicU64::new(0),
        };

        Self {
            directory: config.directory,
            stop_policy: config.stop_policy,
            dispatcher: Arc::new(dispatcher),
            state: Mutex::new(State::Idle),
        }
    }

    /// 监控目录
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 当前状态
    pub fn status(&self) -> SessionStatus {
        match *self.state.lock() {
            State::Idle => SessionStatus::Idle,
            State::Watching(_) => SessionStatus::Watching,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.status() == SessionStatus::Watching
    }

    /// 固件选择句柄
    pub fn payload(&self) -> &PayloadSelection {
        &self.dispatcher.payload
    }

    /// 选择固件文件
    pub fn select_payload(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        match self.dispatcher.payload.select(path) {
            Ok(selected) => {
                self.dispatcher.notifier.notify(Notification::PayloadSelected {
                    path: selected.clone(),
                });
                Ok(selected)
            }
            Err(e) => {
                self.dispatcher.notifier.notify(Notification::PayloadMissing {
                    path: Some(path.to_path_buf()),
                });
                Err(e)
            }
        }
    }

    /// 已派发的任务总数
    pub fn spawned_tasks(&self) -> u64 {
        self.dispatcher.spawned.load(Ordering::Relaxed)
    }

    /// 仍在进行中的任务数
    pub fn in_flight(&self) -> usize {
        self.dispatcher.tracker.len()
    }

    /// 开始监控
    ///
    /// 必须在 tokio runtime 中调用。
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, State::Watching(_)) {
            tracing::warn!("Watch already running for {:?}", self.directory);
            return Err(Error::AlreadyWatching);
        }

        let notifier = &self.dispatcher.notifier;

        if let Err(e) = self.dispatcher.payload.require() {
            notifier.notify(Notification::PayloadMissing {
                path: self.dispatcher.payload.snapshot(),
            });
            return Err(e);
        }

        let (tx, rx) = mpsc::channel::<PathBuf>(EVENT_CHANNEL_CAPACITY);
        let watcher = std::fs::create_dir_all(&self.directory)
            .map_err(|e| {
                Error::WatchSetup(format!("创建目录失败 {}: {}", self.directory.display(), e))
            })
            .and_then(|_| watch_created(&self.directory, tx));
        let watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                notifier.notify(Notification::WatchFailed {
                    directory: self.directory.clone(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let shutdown = CancellationToken::new();
        let pending = CancellationToken::new();
        let dispatch = tokio::spawn(dispatch_loop(
            self.dispatcher.clone(),
            watcher,
            rx,
            shutdown.clone(),
            pending.clone(),
        ));

        *state = State::Watching(Active {
            shutdown,
            pending,
            dispatch,
        });
        notifier.notify(Notification::WatchStarted {
            directory: self.directory.clone(),
        });
        Ok(())
    }

    /// 手动投递一个创建事件（与监听到的事件走同一路径）
    ///
    /// 未在监控时忽略。返回是否派发了任务。
    pub fn handle_created(&self, path: PathBuf) -> bool {
        let pending = match &*self.state.lock() {
            State::Watching(active) => active.pending.clone(),
            State::Idle => return false,
        };
        self.dispatcher.dispatch(path, &pending)
    }

    /// 停止监控；未在监控时什么也不做，返回 false
    ///
    /// 返回时已不再接收新事件。
    pub async fn stop(&self) -> bool {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, State::Idle)
        };
        let active = match previous {
            State::Idle => return false,
            State::Watching(active) => active,
        };

        self.release(&active);
        if let Err(e) = active.dispatch.await {
            tracing::error!("Dispatch loop ended abnormally: {}", e);
        }

        self.dispatcher.notifier.notify(Notification::WatchStopped {
            directory: self.directory.clone(),
        });
        true
    }

    /// 等待所有已派发的任务结束
    pub async fn drain(&self) {
        let tracker = &self.dispatcher.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    fn release(&self, active: &Active) {
        active.shutdown.cancel();
        if self.stop_policy == StopPolicy::CancelPending {
            active.pending.cancel();
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if let State::Watching(active) = std::mem::replace(self.state.get_mut(), State::Idle) {
            tracing::debug!("Session dropped while watching, stopping");
            self.release(&active);
        }
    }
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("directory", &self.directory)
            .field("prefix", &self.dispatcher.prefix)
            .field("status", &self.status())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// 事件循环：持有 watcher，直到收到停止信号
async fn dispatch_loop(
    dispatcher: Arc<Dispatcher>,
    watcher: notify::RecommendedWatcher,
    mut rx: mpsc::Receiver<PathBuf>,
    shutdown: CancellationToken,
    pending: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(path) => {
                    dispatcher.dispatch(path, &pending);
                }
                None => break,
            },
        }
    }

    // 先关闭接收端，再停止监听
    drop(rx);
    drop(watcher);
    tracing::info!("🛑 File watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_filter() {
        let prefix = "Bose Updater";
        assert!(matches_prefix(Path::new("/tmp/Bose Updater-3.tmp"), prefix));
        assert!(matches_prefix(Path::new("Bose Updater"), prefix));
        assert!(!matches_prefix(Path::new("/tmp/Other-1.bin"), prefix));
        assert!(!matches_prefix(Path::new("/tmp/bose updater-1.tmp"), prefix));
        // 只看文件名，不看目录
        assert!(!matches_prefix(Path::new("/tmp/Bose Updater/x.tmp"), prefix));
        assert!(!matches_prefix(Path::new("/"), prefix));
    }

    #[tokio::test]
    async fn test_idle_session_ignores_events() {
        let session = WatchSession::new(WatchConfig::new("/nonexistent"), Notifier::new());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.handle_created(PathBuf::from("/nonexistent/Bose Updater-1")));
        assert_eq!(session.spawned_tasks(), 0);
        assert!(!session.stop().await);
    }
}
