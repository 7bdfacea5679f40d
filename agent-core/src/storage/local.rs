use super::{FileItem, Storage, StorageContext};
use crate::config::LocalSettings;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// 本地文件系统存储
///
/// type: local
/// path: /var/backups/launch
pub struct LocalStorage {
    root: PathBuf,
    ctx: StorageContext,
}

impl LocalStorage {
    pub fn new(settings: &LocalSettings, ctx: StorageContext) -> Self {
        Self {
            root: settings.path.clone(),
            ctx,
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AgentError::storage(format!("非法的文件键: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn open(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            AgentError::storage(format!("无法创建目录 {}: {e}", self.root.display()))
        })?;
        Ok(())
    }

    async fn close(&mut self) {}

    async fn upload(&self, key: &str) -> Result<()> {
        for (source, remote) in self.ctx.upload_entries(key)? {
            let target = self.resolve(&remote)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target).await.map_err(|e| {
                AgentError::storage(format!(
                    "复制 {} 到 {} 失败: {e}",
                    source.display(),
                    target.display()
                ))
            })?;
            info!(model = %self.ctx.model, "=> {}", target.display());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let target = self.resolve(key)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => debug!(file = %target.display(), "已删除"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // 分片目录删空后一并删除
        if let Some(parent) = target.parent() {
            if parent != self.root && is_empty_dir(parent).await {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    async fn list(&self, parent: &str) -> Result<Vec<FileItem>> {
        let root = self.root.clone();
        let start = self.resolve(parent)?;
        tokio::task::spawn_blocking(move || list_files(&root, &start)).await?
    }

    async fn download(&self, key: &str) -> Result<String> {
        let path = self.resolve(key)?;
        if !path.exists() {
            return Err(AgentError::storage(format!("文件不存在: {}", path.display())));
        }
        Ok(path.to_string_lossy().into_owned())
    }
}

async fn is_empty_dir(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

fn list_files(root: &Path, start: &Path) -> Result<Vec<FileItem>> {
    if !start.exists() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(start).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        let relative = entry.path().strip_prefix(root)?;
        let filename = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        items.push(FileItem {
            filename,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    items.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(items)
}
