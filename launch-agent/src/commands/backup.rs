use crate::app::AgentApp;
use crate::utils::format_size;
use agent_core::config::ModelConfig;
use agent_core::error::{AgentError, Result};
use agent_core::model::{ModelRunner, Outcome};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// 立即依次执行指定模型，不指定时执行全部模型
#[instrument(skip_all, fields(models = names.len()))]
pub async fn run_backup(app: &AgentApp, names: Vec<String>) -> Result<()> {
    let config = app.config();
    let models: Vec<Arc<ModelConfig>> = if names.is_empty() {
        config.models.values().cloned().collect()
    } else {
        names
            .iter()
            .map(|name| config.model(name))
            .collect::<Result<_>>()?
    };

    let mut failed = Vec::new();
    for model in models {
        info!("📦 执行模型: {}", model.name);
        match app.pipeline.perform(model).await {
            Outcome::Finished { model, size } => {
                info!("   ✅ {} 备份完成，产物大小 {}", model, format_size(size));
            }
            Outcome::Failed { model, error } => {
                error!("   ❌ {} 备份失败: {}", model, error);
                failed.push(model);
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(AgentError::custom(format!(
            "以下模型执行失败: {}",
            failed.join(", ")
        )))
    }
}
