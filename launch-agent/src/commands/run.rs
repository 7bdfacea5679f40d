use crate::app::AgentApp;
use crate::project_info::get_version_string;
use agent_core::constants::config::WATCH_INTERVAL_SECS;
use agent_core::error::Result;
use agent_core::psutil::{Pulse, PulseRunner, SystemStats};
use agent_core::scheduler::{Scheduler, spawn_config_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// 守护进程：启动调度器和配置文件监视，直到收到 SIGINT / SIGTERM
///
/// SIGHUP 触发重新加载配置，加载失败时继续使用旧配置。
#[instrument(skip_all)]
pub async fn run_daemon(app: &AgentApp) -> Result<()> {
    info!("🚀 {}", get_version_string());

    let pulse: Arc<dyn PulseRunner> = Arc::new(Pulse::new(Arc::new(SystemStats), app.notifier.clone()));
    let scheduler = Arc::new(Mutex::new(Scheduler::new(
        app.store.subscribe(),
        app.pipeline.clone(),
        Some(pulse),
    )));

    {
        let mut guard = scheduler.lock().await;
        if let Err(e) = guard.start() {
            warn!("⚠️  部分定时任务注册失败: {}", e);
        }
        for (name, trigger) in guard.job_triggers() {
            info!("   ⏰ {}: {}", name, trigger);
        }
    }

    let listener = spawn_config_listener(scheduler.clone()).await;
    let cancel = CancellationToken::new();
    let watcher = app
        .store
        .spawn_watcher(Duration::from_secs(WATCH_INTERVAL_SECS), cancel.clone());

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    info!("✅ 调度器已运行，等待任务触发");

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("🔄 收到 SIGHUP，重新加载配置");
                // 失败时已记录日志并保留旧配置
                let _ = app.store.reload();
            }
            _ = terminate.recv() => {
                info!("收到 SIGTERM");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("收到 SIGINT");
                break;
            }
        }
    }

    cancel.cancel();
    scheduler.lock().await.stop();
    if let Some(listener) = listener {
        listener.abort();
    }
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }

    info!("👋 launch-agent 已停止");
    Ok(())
}
