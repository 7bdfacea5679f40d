use crate::app::AgentApp;
use crate::utils::format_size;
use agent_core::error::Result;
use agent_core::storage::{self, BackendFactory, FileItem};
use tracing::{info, instrument};

/// 列出模型在某个存储中的文件
#[instrument(skip(app))]
pub async fn list_files(app: &AgentApp, model: &str, storage: Option<&str>) -> Result<()> {
    let items = fetch_files(app, model, storage).await?;

    if items.is_empty() {
        info!("📭 存储中没有文件");
        return Ok(());
    }
    info!("📋 共 {} 个文件:", items.len());
    for item in &items {
        let modified = item
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("   {}  {:>10}  {}", modified, format_size(item.size), item.filename);
    }
    Ok(())
}

async fn fetch_files(app: &AgentApp, model: &str, storage: Option<&str>) -> Result<Vec<FileItem>> {
    let config = app.config();
    let model = config.model(model)?;
    let mut backend = storage::open_for_query(&BackendFactory, &model, storage).await?;
    let result = backend.list(&model.name).await;
    backend.close().await;
    result
}

/// 输出文件的下载地址（S3 为 1 小时有效的预签名 URL，本地存储为文件路径）
#[instrument(skip(app))]
pub async fn download(app: &AgentApp, model: &str, storage: Option<&str>, key: &str) -> Result<()> {
    let url = resolve_download(app, model, storage, key).await?;
    info!("🔗 {}", url);
    Ok(())
}

async fn resolve_download(
    app: &AgentApp,
    model: &str,
    storage: Option<&str>,
    key: &str,
) -> Result<String> {
    let config = app.config();
    let model = config.model(model)?;
    let mut backend = storage::open_for_query(&BackendFactory, &model, storage).await?;
    let result = backend.download(key).await;
    backend.close().await;
    result
}
