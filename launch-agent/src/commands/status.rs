use crate::app::AgentApp;
use crate::utils::format_size;
use agent_core::error::Result;
use agent_core::psutil::{Pulse, PulseRunner, StatsSource, SystemStats};
use agent_core::rpc::{self, DaemonStatus, UnixRpcClient};
use std::sync::Arc;
use tracing::{info, warn};

/// 发送一次资源心跳；未配置 webhook 时只打印采集结果
pub async fn run_pulse(app: &AgentApp) -> Result<()> {
    let config = app.config();

    if config.pulse.webhook.is_none() {
        warn!("⚠️  未配置 pulse webhook，仅显示本机资源信息");
        let stats = SystemStats.fetch().await?;
        info!("   CPU: {:.1}%", stats.load);
        info!(
            "   内存: {} / {}",
            format_size(stats.memory_used),
            format_size(stats.memory_total)
        );
        info!(
            "   磁盘: {} / {}",
            format_size(stats.disk_used),
            format_size(stats.disk_total)
        );
        return Ok(());
    }

    let pulse = Pulse::new(Arc::new(SystemStats), app.notifier.clone());
    pulse.pulse(config).await?;
    info!("✅ 心跳已发送");
    Ok(())
}

/// 查询 Supervisor 进程状态并上报，未指定 id 时使用配置中的 daemons（为空则查询全部）
pub async fn run_daemon_status(app: &AgentApp, ids: Vec<String>) -> Result<()> {
    let config = app.config();
    let ids = if ids.is_empty() {
        config.supervisor.daemons.clone()
    } else {
        ids
    };

    let client = UnixRpcClient::new(&config.supervisor)?;
    let statuses = rpc::send_daemon_status(
        &client,
        &ids,
        app.notifier.as_ref(),
        config.pulse.webhook.as_ref(),
    )
    .await?;

    for status in &statuses {
        info!("{}", describe(status));
    }
    Ok(())
}

fn describe(status: &DaemonStatus) -> String {
    let icon = match status.status {
        rpc::RunStatus::FullyRunning => "🟢",
        rpc::RunStatus::PartiallyRunning => "🟡",
        rpc::RunStatus::NotRunning => "🔴",
    };
    if status.error.is_empty() {
        format!(
            "{icon} {} ({} 个进程, 运行 {} 秒)",
            status.daemon_id,
            status.processes.len(),
            status.uptime
        )
    } else {
        format!("{icon} {}: {}", status.daemon_id, status.error)
    }
}
