//! 模型执行流水线：导出 -> 归档 -> 压缩 -> 多存储分发 -> 通知

use crate::archive::{Archiver, TarArchiver};
use crate::compressor::{ArtifactCompressor, Compressor};
use crate::config::ModelConfig;
use crate::database::{CommandDumper, Dumper};
use crate::error::{AgentError, Result};
use crate::notifier::Notifier;
use crate::storage::{self, BackendFactory, StorageFactory};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 一次执行的结果，序列化后即通知内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Finished { model: String, size: u64 },
    Failed { model: String, error: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Finished { .. })
    }

    pub fn model(&self) -> &str {
        match self {
            Outcome::Finished { model, .. } | Outcome::Failed { model, .. } => model,
        }
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 执行单个模型
#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn perform(&self, model: Arc<ModelConfig>) -> Outcome;
}

/// 备份流水线，各步骤的实现通过 trait 注入
#[derive(Clone)]
pub struct Pipeline {
    dumper: Arc<dyn Dumper>,
    archiver: Arc<dyn Archiver>,
    compressor: Arc<dyn Compressor>,
    storages: Arc<dyn StorageFactory>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        dumper: Arc<dyn Dumper>,
        archiver: Arc<dyn Archiver>,
        compressor: Arc<dyn Compressor>,
        storages: Arc<dyn StorageFactory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            dumper,
            archiver,
            compressor,
            storages,
            notifier,
        }
    }

    /// 使用真实的外部命令和存储后端，通知通过 `notifier` 发送
    pub fn with_defaults(notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            Arc::new(CommandDumper),
            Arc::new(TarArchiver),
            Arc::new(ArtifactCompressor),
            Arc::new(BackendFactory),
            notifier,
        )
    }

    /// 执行模型，任何步骤失败或崩溃都会被转换为失败结果；返回前总会清理临时目录
    #[instrument(skip_all, fields(model = %model.name))]
    pub async fn run(&self, model: &ModelConfig) -> Outcome {
        info!(dump_path = %model.dump_path.display(), "开始执行");

        let result = match AssertUnwindSafe(self.steps(model)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(AgentError::Panic(panic_message(panic.as_ref()))),
        };

        cleanup(model.cleanup_path()).await;

        let outcome = match result {
            Ok(size) => {
                info!(size, "执行完成");
                Outcome::Finished {
                    model: model.name.clone(),
                    size,
                }
            }
            Err(e) => {
                error!(error = %e, "执行失败");
                Outcome::Failed {
                    model: model.name.clone(),
                    error: e.to_string(),
                }
            }
        };

        self.notify(model, &outcome).await;
        outcome
    }

    async fn steps(&self, model: &ModelConfig) -> Result<u64> {
        for database in &model.databases {
            self.dumper.dump(model, database).await?;
        }

        if let Some(archive) = &model.archive {
            self.archiver.archive(model, archive).await?;
        }

        // 即使未配置压缩也会打包为 tar
        let artifact = self.compressor.compress(model).await?;
        let size = artifact_size(&artifact).await?;

        storage::run(self.storages.as_ref(), model, &artifact).await?;
        Ok(size)
    }

    async fn notify(&self, model: &ModelConfig, outcome: &Outcome) {
        let Some(target) = &model.webhook else {
            debug!(model = %model.name, "未配置 webhook，跳过通知");
            return;
        };
        if let Err(e) = self.notifier.notify(target, &outcome.payload()).await {
            warn!(model = %model.name, error = %e, "通知发送失败");
        }
    }
}

#[async_trait]
impl ModelRunner for Pipeline {
    async fn perform(&self, model: Arc<ModelConfig>) -> Outcome {
        self.run(&model).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 产物大小，目录产物为所有分片之和
async fn artifact_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    let mut total = 0;
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        total += entry.metadata().await?.len();
    }
    Ok(total)
}

async fn cleanup(dir: &Path) {
    info!(dir = %dir.display(), "清理临时目录");
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(dir = %dir.display(), error = %e, "清理临时目录失败"),
    }
}
