use agent_core::config::{AgentConfig, ConfigStore};
use agent_core::error::Result;
use agent_core::model::Pipeline;
use agent_core::notifier::WebhookNotifier;
use std::path::Path;
use std::sync::Arc;

use crate::cli::Commands;
use crate::commands;
use tracing::info;

#[derive(Clone)]
pub struct AgentApp {
    pub store: Arc<ConfigStore>,
    pub pipeline: Arc<Pipeline>,
    pub notifier: Arc<WebhookNotifier>,
}

impl AgentApp {
    /// 加载配置（未指定路径时按搜索路径查找）并组装流水线
    pub fn load(config: Option<&Path>) -> Result<Self> {
        let store = Arc::new(ConfigStore::load(config)?);
        let notifier = Arc::new(WebhookNotifier::new()?);
        let pipeline = Arc::new(Pipeline::with_defaults(notifier.clone()));

        Ok(Self {
            store,
            pipeline,
            notifier,
        })
    }

    /// 当前配置快照
    pub fn config(&self) -> Arc<AgentConfig> {
        self.store.current()
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Run => {
                info!("🚀 启动调度器...");
                commands::run_daemon(self).await
            }
            Commands::Backup { models, names } => {
                commands::run_backup(self, Commands::backup_models(models, names)).await
            }
            Commands::Pulse => {
                info!("💓 发送资源心跳...");
                commands::run_pulse(self).await
            }
            Commands::DStat { ids } => {
                info!("📊 查询进程状态...");
                commands::run_daemon_status(self, ids).await
            }
            Commands::Files { model, storage } => {
                commands::list_files(self, &model, storage.as_deref()).await
            }
            Commands::Download {
                model,
                storage,
                key,
            } => commands::download(self, &model, storage.as_deref(), &key).await,
            Commands::Check => commands::run_check(self).await,
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
        }
    }
}
