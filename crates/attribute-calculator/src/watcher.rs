//! 规则文档热更新
//!
//! 监听规则文件变化，去抖后重新加载并原子替换 [`RuleStore`] 中的规则集。
//! 新文档校验失败时保留当前规则集。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use gateway_shared::observability::metrics::record_rule_reload;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info, warn};

use crate::store::RuleStore;

/// 规则来源监听器
#[async_trait]
pub trait RulesWatcher: Send + Sync {
    /// 启动监听，规则变更时更新规则存储
    async fn start(&self) -> Result<()>;

    /// 停止监听并释放资源
    async fn stop(&self) -> Result<()>;
}

/// 基于文件系统事件的规则监听器
///
/// 监听规则文件所在目录，兼容编辑器整体替换文件和 K8s ConfigMap 的符号链接切换。
pub struct FileRulesWatcher {
    path: PathBuf,
    debounce: Duration,
    store: RuleStore,
    /// 持有 notify watcher，drop 后停止监听
    watcher: Mutex<Option<RecommendedWatcher>>,
    shutdown_tx: watch::Sender<bool>,
}

impl FileRulesWatcher {
    pub fn new(path: impl AsRef<Path>, debounce: Duration, store: RuleStore) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            path: path.as_ref().to_path_buf(),
            debounce,
            store,
            watcher: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// 被监听的目录
    fn watch_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl RulesWatcher for FileRulesWatcher {
    async fn start(&self) -> Result<()> {
        let mut guard = self.watcher.lock().await;
        if guard.is_some() {
            warn!(path = %self.path.display(), "规则文件监听已在运行");
            return Ok(());
        }

        let (event_tx, event_rx) = mpsc::channel::<()>(16);
        let file_name = self.path.file_name().map(|name| name.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                );
                let touches_rules = file_name.as_ref().is_none_or(|name| {
                    event.paths.iter().any(|p| p.file_name() == Some(name.as_os_str()))
                });
                if relevant && touches_rules {
                    let _ = event_tx.try_send(());
                }
            }
            Err(e) => {
                warn!(error = %e, "规则文件监听事件错误");
            }
        })
        .context("创建规则文件监听器失败")?;

        let watch_dir = self.watch_dir();
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("监听目录失败: {}", watch_dir.display()))?;
        *guard = Some(watcher);

        info!(path = %self.path.display(), debounce_ms = self.debounce.as_millis() as u64, "规则文件监听已启动");

        tokio::spawn(reload_loop(
            self.path.clone(),
            self.debounce,
            self.store.clone(),
            event_rx,
            self.shutdown_tx.subscribe(),
        ));

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.watcher.lock().await.take();
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}

/// 重载循环
///
/// 收到停止信号、停止信号的发送端被 drop，或 notify 事件通道关闭时退出。
async fn reload_loop(
    path: PathBuf,
    debounce: Duration,
    store: RuleStore,
    mut event_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                if event.is_none() {
                    break;
                }

                // 窗口期内的连续写入只触发一次重载
                tokio::time::sleep(debounce).await;
                while event_rx.try_recv().is_ok() {}

                let started = Instant::now();
                match store.reload_from(&path) {
                    Ok(targets) => {
                        info!(
                            path = %path.display(),
                            targets,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "规则文件变更，已重新加载"
                        );
                        record_rule_reload(true, targets);
                    }
                    Err(e) => {
                        error!(
                            path = %path.display(),
                            error = %e,
                            "规则文件重新加载失败，保留当前规则集"
                        );
                        record_rule_reload(false, 0);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(path = %path.display(), "规则文件监听已停止");
}
