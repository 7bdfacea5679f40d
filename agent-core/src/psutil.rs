//! 主机资源采集与心跳（pulse）上报

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::notifier::Notifier;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::json;
use std::sync::Arc;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};
use tracing::{debug, info, instrument, warn};

/// 一次资源快照
///
/// 字段名与数值格式沿用 Launch 服务端的约定：容量为字节数的字符串。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stats {
    /// CPU 使用率（百分比）
    pub load: f64,
    #[serde(serialize_with = "as_string")]
    pub disk_total: u64,
    #[serde(serialize_with = "as_string")]
    pub disk_free: u64,
    #[serde(serialize_with = "as_string")]
    pub disk_used: u64,
    #[serde(serialize_with = "as_string")]
    pub memory_total: u64,
    #[serde(serialize_with = "as_string")]
    pub memory_free: u64,
    #[serde(serialize_with = "as_string")]
    pub memory_used: u64,
}

fn as_string<S: Serializer>(value: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self) -> Result<Stats>;
}

/// 基于 `sysinfo` 的采集实现，CPU 使用率取两次刷新之间的平均值
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStats;

#[async_trait]
impl StatsSource for SystemStats {
    async fn fetch(&self) -> Result<Stats> {
        let mut system = System::new();
        system.refresh_cpu_usage();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL.max(std::time::Duration::from_secs(1))).await;

        tokio::task::spawn_blocking(move || {
            system.refresh_cpu_usage();
            system.refresh_memory();

            let disks = Disks::new_with_refreshed_list();
            // 只关心第一块磁盘（通常为根分区）
            let disk = disks
                .list()
                .first()
                .ok_or_else(|| AgentError::stats("未找到任何磁盘分区"))?;
            let disk_total = disk.total_space();
            let disk_free = disk.available_space();

            Ok(Stats {
                load: f64::from(system.global_cpu_usage()),
                disk_total,
                disk_free,
                disk_used: disk_total.saturating_sub(disk_free),
                memory_total: system.total_memory(),
                memory_free: system.free_memory(),
                memory_used: system.used_memory(),
            })
        })
        .await?
    }
}

/// 心跳任务
#[async_trait]
pub trait PulseRunner: Send + Sync {
    async fn pulse(&self, config: Arc<AgentConfig>) -> Result<()>;
}

/// 采集资源并发送 `{"event":"pulse","data":...}`
#[derive(Clone)]
pub struct Pulse {
    stats: Arc<dyn StatsSource>,
    notifier: Arc<dyn Notifier>,
}

impl Pulse {
    pub fn new(stats: Arc<dyn StatsSource>, notifier: Arc<dyn Notifier>) -> Self {
        Self { stats, notifier }
    }
}

#[async_trait]
impl PulseRunner for Pulse {
    #[instrument(skip_all)]
    async fn pulse(&self, config: Arc<AgentConfig>) -> Result<()> {
        let Some(target) = &config.pulse.webhook else {
            debug!("未配置 pulse webhook，跳过");
            return Ok(());
        };

        let stats = match self.stats.fetch().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "资源采集失败");
                return Err(e);
            }
        };

        let payload = json!({ "event": "pulse", "data": stats });
        self.notifier.notify(target, &payload).await?;
        info!(load = stats.load, "pulse 已发送");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::model::tests::RecordingNotifier;

    struct FixedStats(Option<Stats>);

    #[async_trait]
    impl StatsSource for FixedStats {
        async fn fetch(&self) -> Result<Stats> {
            self.0
                .clone()
                .ok_or_else(|| AgentError::stats("permission denied"))
        }
    }

    fn sample() -> Stats {
        Stats {
            load: 12.5,
            disk_total: 1000,
            disk_free: 400,
            disk_used: 600,
            memory_total: 2048,
            memory_free: 1024,
            memory_used: 1024,
        }
    }

    fn config_with_pulse_webhook() -> Arc<AgentConfig> {
        let mut config = AgentConfig::empty();
        config.pulse.enabled = true;
        config.pulse.webhook = Some(WebhookConfig::new("http://hooks.invalid/pulse"));
        Arc::new(config)
    }

    #[test]
    fn test_stats_serialization() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "Load": 12.5,
                "DiskTotal": "1000",
                "DiskFree": "400",
                "DiskUsed": "600",
                "MemoryTotal": "2048",
                "MemoryFree": "1024",
                "MemoryUsed": "1024",
            })
        );
    }

    #[tokio::test]
    async fn test_pulse_sends_payload() {
        let notifier = Arc::new(RecordingNotifier::default());
        let pulse = Pulse::new(Arc::new(FixedStats(Some(sample()))), notifier.clone());

        pulse.pulse(config_with_pulse_webhook()).await.unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["event"], "pulse");
        assert_eq!(sent[0]["data"]["DiskUsed"], "600");
    }

    #[tokio::test]
    async fn test_fetch_failure_sends_nothing() {
        let notifier = Arc::new(RecordingNotifier::default());
        let pulse = Pulse::new(Arc::new(FixedStats(None)), notifier.clone());

        let result = pulse.pulse(config_with_pulse_webhook()).await;
        assert!(matches!(result, Err(AgentError::Stats(_))));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_webhook_is_skipped() {
        let notifier = Arc::new(RecordingNotifier::default());
        let pulse = Pulse::new(Arc::new(FixedStats(Some(sample()))), notifier.clone());

        pulse.pulse(Arc::new(AgentConfig::empty())).await.unwrap();
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
