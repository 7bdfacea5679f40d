use super::AgentConfig;
use crate::error::{AgentError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 配置快照的发布者
///
/// 读者通过 [`ConfigStore::subscribe`] 拿到 `watch::Receiver`，只会看到完整的旧快照或新快照。
/// 重新加载失败时保留上一次的快照，不通知订阅者。
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Arc<AgentConfig>>,
}

impl ConfigStore {
    pub fn new(config: AgentConfig) -> Self {
        let path = config.config_file.clone();
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { path, tx }
    }

    /// 加载配置文件并创建存储
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(Self::new(AgentConfig::load(path)?))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 当前配置快照
    pub fn current(&self) -> Arc<AgentConfig> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AgentConfig>> {
        self.tx.subscribe()
    }

    /// 直接发布新的快照
    pub fn replace(&self, config: AgentConfig) {
        self.tx.send_replace(Arc::new(config));
    }

    /// 从配置文件重新加载，成功后通知所有订阅者
    pub fn reload(&self) -> Result<Arc<AgentConfig>> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| AgentError::config("当前配置不是从文件加载的，无法重新加载"))?;

        match AgentConfig::load_from_file(path) {
            Ok(config) => {
                let config = Arc::new(config);
                self.tx.send_replace(config.clone());
                info!(file = %path.display(), models = config.models.len(), "配置已重新加载");
                Ok(config)
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "重新加载配置失败，继续使用旧配置");
                Err(e)
            }
        }
    }

    /// 轮询配置文件修改时间，变化时重新加载
    pub fn spawn_watcher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let path = self.path.clone()?;
        let store = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut last_modified = modified_at(&path);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("配置文件监视已停止");
                        break;
                    }
                    _ = ticker.tick() => {
                        let current = modified_at(&path);
                        if current.is_some() && current != last_modified {
                            info!(file = %path.display(), "检测到配置文件变更");
                            last_modified = current;
                            let _ = store.reload();
                        }
                    }
                }
            }
        }))
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
