//! 压缩：把 `dump_path` 打包为 `<temp_path>/<时间戳>.<扩展名>`，可选按大小分片

use crate::config::{CompressKind, ModelConfig};
use crate::constants::artifact::{PART_SUFFIX_WIDTH, TIMESTAMP_FORMAT};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use chrono::Local;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[async_trait]
pub trait Compressor: Send + Sync {
    /// 生成产物，返回文件路径（分片时为目录路径）
    async fn compress(&self, model: &ModelConfig) -> Result<PathBuf>;
}

/// 按模型的 `compress_with` / `split_with` 配置生成产物
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactCompressor;

#[async_trait]
impl Compressor for ArtifactCompressor {
    #[instrument(skip_all, fields(model = %model.name))]
    async fn compress(&self, model: &ModelConfig) -> Result<PathBuf> {
        let kind = model.compress_with.kind;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let file_name = format!("{timestamp}.{}", kind.extension());
        let output = model.temp_path.join(&file_name);

        info!("=> 压缩 | {}", kind.extension());
        tokio::fs::create_dir_all(&model.dump_path).await?;

        let source = model.dump_path.clone();
        let target = output.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            match kind {
                CompressKind::Tar => {
                    write_tar(&source, BufWriter::new(File::create(&target)?))?.flush()?;
                }
                CompressKind::Tgz => {
                    let file = BufWriter::new(File::create(&target)?);
                    let encoder = GzEncoder::new(file, Compression::default());
                    write_tar(&source, encoder)?.finish()?.flush()?;
                }
                CompressKind::Zip => write_zip(&source, &target)?,
            }
            Ok(())
        })
        .await??;

        let artifact = match model.split_with {
            Some(split) => {
                let dir = model.temp_path.join(&timestamp);
                let source = output.clone();
                let parts_dir = dir.clone();
                let parts = tokio::task::spawn_blocking(move || {
                    split_file(&source, &parts_dir, split.chunk_size)
                })
                .await??;
                info!(parts, dir = %dir.display(), "产物已分片");
                dir
            }
            None => output,
        };

        info!(artifact = %artifact.display(), "压缩完成");
        Ok(artifact)
    }
}

/// 写入 tar，归档内路径以模型目录名为根
fn write_tar<W: Write>(source: &Path, writer: W) -> Result<W> {
    let root = dir_name(source)?;
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(&root, source)
        .map_err(|e| AgentError::compress(format!("打包 {} 失败: {e}", source.display())))?;
    builder
        .into_inner()
        .map_err(|e| AgentError::compress(format!("完成打包失败: {e}")))
}

fn write_zip(source: &Path, target: &Path) -> Result<()> {
    let root = dir_name(source)?;
    let mut zip = ZipWriter::new(BufWriter::new(File::create(target)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source)?;
        let mut name = root.clone();
        for part in relative.components() {
            name.push('/');
            name.push_str(&part.as_os_str().to_string_lossy());
        }

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            io::copy(&mut reader, &mut zip)?;
        }
    }

    zip.finish()?.flush()?;
    Ok(())
}

fn dir_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AgentError::compress(format!("无效的目录: {}", path.display())))
}

/// 把文件切分到 `dir/<文件名>-000`、`-001`…，完成后删除原文件，返回分片数量
pub fn split_file(source: &Path, dir: &Path, chunk_size: u64) -> Result<usize> {
    if chunk_size == 0 {
        return Err(AgentError::compress("分片大小必须大于 0"));
    }
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AgentError::compress(format!("无效的产物: {}", source.display())))?;

    std::fs::create_dir_all(dir)?;
    let mut reader = BufReader::new(File::open(source)?);
    let mut parts = 0;
    loop {
        let part_path = dir.join(part_name(&file_name, parts));
        let mut part = File::create(&part_path)?;
        let written = io::copy(&mut (&mut reader).take(chunk_size), &mut part)?;
        if written == 0 && parts > 0 {
            drop(part);
            std::fs::remove_file(&part_path)?;
            break;
        }
        parts += 1;
        if written < chunk_size {
            break;
        }
    }

    std::fs::remove_file(source)?;
    Ok(parts)
}

fn part_name(file_name: &str, index: usize) -> String {
    format!("{file_name}-{index:0width$}", width = PART_SUFFIX_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressConfig, SplitConfig};
    use crate::storage::artifact_timestamp;
    use crate::storage::tests::{model_with, storage};
    use flate2::read::GzDecoder;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn prepared_model(work: &Path, kind: CompressKind) -> ModelConfig {
        let mut model = model_with("daily-db", work, vec![storage("s", 0)]);
        model.compress_with = CompressConfig { kind };
        let db_dir = model.dump_path.join("mysql").join("app");
        std::fs::create_dir_all(&db_dir).unwrap();
        std::fs::write(db_dir.join("app.sql"), b"CREATE TABLE t (id INT);").unwrap();
        model
    }

    fn tar_entries<R: Read>(reader: R) -> BTreeSet<String> {
        tar::Archive::new(reader)
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_compress_tar() {
        let work = tempdir().unwrap();
        let model = prepared_model(work.path(), CompressKind::Tar);
        let artifact = ArtifactCompressor.compress(&model).await.unwrap();

        let name = artifact.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(".tar"));
        assert!(artifact_timestamp(&name).is_some());
        assert_eq!(artifact.parent().unwrap(), model.temp_path);

        let entries = tar_entries(File::open(&artifact).unwrap());
        assert!(entries.contains("daily-db/mysql/app/app.sql"));
    }

    #[tokio::test]
    async fn test_compress_tgz() {
        let work = tempdir().unwrap();
        let model = prepared_model(work.path(), CompressKind::Tgz);
        let artifact = ArtifactCompressor.compress(&model).await.unwrap();
        assert!(artifact.to_string_lossy().ends_with(".tar.gz"));

        let entries = tar_entries(GzDecoder::new(File::open(&artifact).unwrap()));
        assert!(entries.contains("daily-db/mysql/app/app.sql"));
    }

    #[tokio::test]
    async fn test_compress_zip() {
        let work = tempdir().unwrap();
        let model = prepared_model(work.path(), CompressKind::Zip);
        let artifact = ArtifactCompressor.compress(&model).await.unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&artifact).unwrap()).unwrap();
        let mut file = archive.by_name("daily-db/mysql/app/app.sql").unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "CREATE TABLE t (id INT);");
    }

    #[tokio::test]
    async fn test_compress_with_split() {
        let work = tempdir().unwrap();
        let mut model = prepared_model(work.path(), CompressKind::Tar);
        model.split_with = Some(SplitConfig { chunk_size: 1024 });
        let artifact = ArtifactCompressor.compress(&model).await.unwrap();

        assert!(artifact.is_dir());
        let dir_name = artifact.file_name().unwrap().to_string_lossy().to_string();
        assert!(artifact_timestamp(&dir_name).is_some());

        let parts: Vec<String> = std::fs::read_dir(&artifact)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        assert!(parts.len() > 1);
        assert_eq!(parts[0], format!("{dir_name}.tar-000"));
        assert_eq!(parts[1], format!("{dir_name}.tar-001"));
        assert!(!model.temp_path.join(format!("{dir_name}.tar")).exists());
    }

    #[test]
    fn test_split_file_exact_chunks() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.tar");
        std::fs::write(&source, vec![7u8; 20]).unwrap();

        let parts = split_file(&source, &dir.path().join("a"), 10).unwrap();
        assert_eq!(parts, 2);
        assert_eq!(std::fs::read(dir.path().join("a/a.tar-000")).unwrap().len(), 10);
        assert_eq!(std::fs::read(dir.path().join("a/a.tar-001")).unwrap().len(), 10);
        assert!(!dir.path().join("a/a.tar-002").exists());
        assert!(!source.exists());
    }

    #[test]
    fn test_part_name() {
        assert_eq!(part_name("x.tar", 0), "x.tar-000");
        assert_eq!(part_name("x.tar", 12), "x.tar-012");
    }
}
