//! 多存储分发：把产物上传到模型配置的每个存储，并按各自的 `keep` 清理旧产物
//!
//! 产物在存储中的键为 `<模型名>/<产物名>`，多个模型共用同一存储时各自独立保留。

pub mod cycler;
pub mod local;
pub mod s3;

use crate::config::{ModelConfig, StorageBackend, StorageConfig};
use crate::constants::artifact::TIMESTAMP_FORMAT;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

pub use local::LocalStorage;
pub use s3::S3Storage;

/// 存储中的一个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    pub filename: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// 单个存储目标的上下文
///
/// 产物为目录（分片）时，`members` 为目录内的文件名。
#[derive(Debug, Clone, Default)]
pub struct StorageContext {
    pub model: String,
    pub storage: String,
    pub artifact: Option<PathBuf>,
    pub members: Vec<String>,
    pub keep: i64,
}

impl StorageContext {
    pub fn new(model: &str, storage: &StorageConfig, artifact: Option<&Path>) -> Result<Self> {
        let members = match artifact {
            Some(path) if path.is_dir() => directory_members(path)?,
            _ => Vec::new(),
        };
        Ok(Self {
            model: model.to_string(),
            storage: storage.name.clone(),
            artifact: artifact.map(Path::to_path_buf),
            members,
            keep: storage.keep,
        })
    }

    /// 上传时需要处理的 (本地文件, 远端键) 列表
    pub fn upload_entries(&self, key: &str) -> Result<Vec<(PathBuf, String)>> {
        let artifact = self
            .artifact
            .as_deref()
            .ok_or_else(|| AgentError::storage("没有可上传的产物"))?;

        if self.members.is_empty() {
            return Ok(vec![(artifact.to_path_buf(), key.to_string())]);
        }

        Ok(self
            .members
            .iter()
            .map(|name| (artifact.join(name), format!("{key}/{name}")))
            .collect())
    }
}

fn directory_members(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AgentError::storage(format!("无效的产物路径: {}", path.display())))
}

/// 存储后端能力集合
#[async_trait]
pub trait Storage: Send + Sync {
    async fn open(&mut self) -> Result<()>;

    async fn close(&mut self);

    /// 上传当前产物，`key` 为 `<模型名>/<产物名>`（目录产物时上传其中所有分片）
    async fn upload(&self, key: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// 列出 `parent` 下的文件，文件名为相对存储根目录的路径
    async fn list(&self, parent: &str) -> Result<Vec<FileItem>>;

    /// 获取下载地址（URL 或本地路径）
    async fn download(&self, key: &str) -> Result<String>;
}

/// 根据存储类型创建后端
pub trait StorageFactory: Send + Sync {
    fn create(&self, config: &StorageConfig, ctx: StorageContext) -> Result<Box<dyn Storage>>;
}

/// 默认工厂，按 `type` 创建本地或 S3 存储
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFactory;

impl StorageFactory for BackendFactory {
    fn create(&self, config: &StorageConfig, ctx: StorageContext) -> Result<Box<dyn Storage>> {
        match &config.backend {
            StorageBackend::Local(settings) => Ok(Box::new(LocalStorage::new(settings, ctx))),
            StorageBackend::S3(settings) => Ok(Box::new(S3Storage::new(settings, ctx))),
        }
    }
}

/// 产物名中的时间戳，例如 `2024.01.15.03.00.00.tar.gz` -> 2024-01-15 03:00:00
pub fn artifact_timestamp(name: &str) -> Option<NaiveDateTime> {
    let prefix = name.get(..19)?;
    NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT).ok()
}

/// 模型产物在存储中的键
pub fn artifact_key(model: &str, name: &str) -> String {
    format!("{model}/{name}")
}

/// 把模型目录下的文件归并为保留单元：单个文件或分片目录，只保留以时间戳开头的单元
///
/// 不在 `<model>/` 下的文件属于其他模型，不参与保留。
pub fn group_units(model: &str, items: &[FileItem]) -> BTreeMap<String, Vec<String>> {
    let prefix = format!("{model}/");
    let mut units: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in items {
        let key = item.filename.trim_start_matches('/');
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        let unit = rest.split('/').next().unwrap_or(rest);
        if artifact_timestamp(unit).is_none() {
            continue;
        }
        units
            .entry(artifact_key(model, unit))
            .or_default()
            .push(key.to_string());
    }
    units
}

/// 在单个存储上执行: open -> list -> upload -> cycle -> close
#[instrument(skip_all, fields(model = %model.name, storage = %storage.name, kind = storage.backend.type_name()))]
async fn run_target(
    factory: &dyn StorageFactory,
    model: &ModelConfig,
    storage: &StorageConfig,
    artifact: &Path,
) -> Result<()> {
    let new_key = artifact_key(&model.name, &file_name(artifact)?);
    let ctx = StorageContext::new(&model.name, storage, Some(artifact))?;
    let mut backend = factory.create(storage, ctx)?;

    info!("=> 存储 | {}", storage.backend.type_name());
    backend.open().await?;
    let result = upload_and_cycle(backend.as_ref(), &model.name, storage, &new_key).await;
    backend.close().await;
    result
}

async fn upload_and_cycle(
    backend: &dyn Storage,
    model: &str,
    storage: &StorageConfig,
    new_key: &str,
) -> Result<()> {
    let units = if storage.keep > 0 {
        match backend.list(model).await {
            Ok(items) => group_units(model, &items),
            Err(e) => {
                warn!(error = %e, "列出已有备份失败，本次跳过清理");
                BTreeMap::new()
            }
        }
    } else {
        BTreeMap::new()
    };

    backend.upload(new_key).await?;
    info!(key = %new_key, "上传完成");

    let existing: Vec<String> = units.keys().cloned().collect();
    cycler::cycle(new_key, &existing, storage.keep, |unit| {
        let members = units.get(&unit).cloned().unwrap_or_else(|| vec![unit.clone()]);
        async move {
            for member in members {
                backend.delete(&member).await?;
            }
            Ok::<(), AgentError>(())
        }
    })
    .await;

    Ok(())
}

/// 把产物分发到模型的所有存储
///
/// 只有一个存储时失败直接返回；多个存储时记录每个失败，继续处理其余存储，最后汇总返回。
pub async fn run(factory: &dyn StorageFactory, model: &ModelConfig, artifact: &Path) -> Result<()> {
    if model.storages.len() == 1 {
        return run_target(factory, model, &model.storages[0], artifact).await;
    }

    let mut failures = Vec::new();
    for storage in &model.storages {
        if let Err(e) = run_target(factory, model, storage, artifact).await {
            error!(model = %model.name, storage = %storage.name, error = %e, "存储失败");
            failures.push(format!("{}: {e}", storage.name));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(AgentError::storage(format!("[{}]", failures.join("; "))))
    }
}

/// 打开模型的某个存储用于查询（列表、下载），不关联产物
pub async fn open_for_query(
    factory: &dyn StorageFactory,
    model: &ModelConfig,
    storage: Option<&str>,
) -> Result<Box<dyn Storage>> {
    let storage = model.storage(storage)?;
    let ctx = StorageContext::new(&model.name, storage, None)?;
    let mut backend = factory.create(storage, ctx)?;
    backend.open().await?;
    Ok(backend)
}
