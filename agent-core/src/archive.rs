//! 文件归档：把 `includes` 中的文件和目录（排除 `excludes`）打包为 `<dump_path>/archive.tar`

use crate::config::{ArchiveConfig, ModelConfig};
use crate::constants::artifact::ARCHIVE_FILE_NAME;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::Builder;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, model: &ModelConfig, config: &ArchiveConfig) -> Result<PathBuf>;
}

/// 使用 `tar` crate 在本进程内打包
#[derive(Debug, Default, Clone, Copy)]
pub struct TarArchiver;

#[async_trait]
impl Archiver for TarArchiver {
    #[instrument(skip_all, fields(model = %model.name))]
    async fn archive(&self, model: &ModelConfig, config: &ArchiveConfig) -> Result<PathBuf> {
        if config.includes.is_empty() {
            return Err(AgentError::archive("archive.includes 不能为空"));
        }

        info!("=> 归档文件");
        tokio::fs::create_dir_all(&model.dump_path).await?;
        let target = model.dump_path.join(ARCHIVE_FILE_NAME);

        let includes: Vec<PathBuf> = config
            .includes
            .iter()
            .map(|p| absolute(&model.work_dir, p))
            .collect();
        let excludes: Vec<PathBuf> = config
            .excludes
            .iter()
            .map(|p| absolute(&model.work_dir, p))
            .collect();
        let output = target.clone();

        let count = tokio::task::spawn_blocking(move || build_archive(&output, &includes, &excludes))
            .await??;
        info!(file = %target.display(), entries = count, "归档完成");
        Ok(target)
    }
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// 归档内的路径：去掉根目录前缀，统一使用 `/`
fn entry_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn build_archive(output: &Path, includes: &[PathBuf], excludes: &[PathBuf]) -> Result<usize> {
    let file = File::create(output)?;
    let mut builder = Builder::new(file);
    builder.follow_symlinks(false);

    let mut count = 0;
    for include in includes {
        if !include.exists() {
            warn!(path = %include.display(), "归档路径不存在，已跳过");
            continue;
        }

        let walker = WalkDir::new(include)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !excludes.iter().any(|ex| e.path().starts_with(ex)));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "读取归档路径失败，已跳过");
                    continue;
                }
            };
            let name = entry_name(entry.path());
            if name.is_empty() {
                continue;
            }

            let result = if entry.file_type().is_dir() {
                builder.append_dir(&name, entry.path())
            } else {
                builder.append_path_with_name(entry.path(), &name)
            };
            result.map_err(|e| {
                AgentError::archive(format!("添加 {} 失败: {e}", entry.path().display()))
            })?;
            count += 1;
        }
    }

    builder
        .finish()
        .map_err(|e| AgentError::archive(format!("完成归档失败: {e}")))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{model_with, storage};
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn entries(archive: &Path) -> BTreeSet<String> {
        let mut reader = tar::Archive::new(File::open(archive).unwrap());
        reader
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_archive_includes_minus_excludes() {
        let src = tempdir().unwrap();
        let work = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("site/cache")).unwrap();
        std::fs::write(src.path().join("site/index.html"), b"<html>").unwrap();
        std::fs::write(src.path().join("site/cache/page"), b"cached").unwrap();
        std::fs::write(src.path().join("nginx.conf"), b"server {}").unwrap();

        let model = model_with("files", work.path(), vec![storage("s", 0)]);
        let config = ArchiveConfig {
            includes: vec![
                src.path().join("site"),
                src.path().join("nginx.conf"),
                src.path().join("missing"),
            ],
            excludes: vec![src.path().join("site/cache")],
        };

        let path = TarArchiver.archive(&model, &config).await.unwrap();
        assert_eq!(path, model.dump_path.join("archive.tar"));

        let names = entries(&path);
        let prefix = entry_name(src.path());
        assert!(names.contains(&format!("{prefix}/site/index.html")));
        assert!(names.contains(&format!("{prefix}/nginx.conf")));
        assert!(!names.iter().any(|n| n.contains("cache")));
    }

    #[tokio::test]
    async fn test_empty_includes_is_error() {
        let work = tempdir().unwrap();
        let model = model_with("files", work.path(), vec![storage("s", 0)]);
        let result = TarArchiver.archive(&model, &ArchiveConfig::default()).await;
        assert!(matches!(result, Err(AgentError::Archive(_))));
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name(Path::new("/var/www/html")), "var/www/html");
        assert_eq!(entry_name(Path::new("/")), "");
    }
}
