use crate::app::AgentApp;
use agent_core::error::{AgentError, Result};
use agent_core::schedule;
use tracing::{error, info};

/// 校验配置：显示每个模型的调度、数据源和存储，调度无效时返回错误
pub async fn run_check(app: &AgentApp) -> Result<()> {
    let config = app.config();
    if let Some(file) = &config.config_file {
        info!("📄 配置文件: {}", file.display());
    }
    info!("📁 工作目录: {}", config.workdir.display());
    if config.pulse.enabled {
        info!("💓 pulse: every {}", config.pulse.every);
    }

    let mut invalid = Vec::new();
    for (name, model) in &config.models {
        info!("📦 {}", name);
        match &model.schedule {
            Some(schedule_config) => match schedule_config.resolve() {
                Ok(trigger) => info!("   ⏰ {}", trigger),
                Err(e) => {
                    error!("   ❌ 调度无效: {}", e);
                    invalid.push(name.clone());
                }
            },
            None => info!("   ⏰ {}", schedule::describe(None)),
        }
        for database in &model.databases {
            info!("   🗄️  {} ({})", database.name, database.kind.type_name());
        }
        if let Some(archive) = &model.archive {
            info!("   🗂️  归档 {} 个路径", archive.includes.len());
        }
        for storage in &model.storages {
            let default = if storage.name == model.default_storage {
                " [默认]"
            } else {
                ""
            };
            info!(
                "   💾 {} ({}, keep {}){}",
                storage.name,
                storage.backend.type_name(),
                storage.keep,
                default
            );
        }
    }

    if invalid.is_empty() {
        info!("✅ 配置有效");
        Ok(())
    } else {
        Err(AgentError::schedule(format!(
            "以下模型的调度无效: {}",
            invalid.join(", ")
        )))
    }
}
