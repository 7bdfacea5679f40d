//! 定时调度：每个模型一个定时器，外加可选的 pulse 定时器
//!
//! 定时器只负责触发，任务体在独立的 task 中执行，因此 `stop` / `restart`
//! 不会打断正在执行的备份。所有模型任务共用一把异步锁，同一时刻最多执行一个。

use crate::config::{AgentConfig, ModelConfig};
use crate::error::{AgentError, Result};
use crate::model::ModelRunner;
use crate::psutil::PulseRunner;
use crate::schedule::{Trigger, fire_time, parse_duration};
use chrono::Local;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// pulse 任务在调度器中的名称
pub const PULSE_JOB: &str = "pulse";

struct JobHandle {
    trigger: String,
    task: JoinHandle<()>,
}

#[derive(Clone)]
enum Job {
    Model {
        model: Arc<ModelConfig>,
        runner: Arc<dyn ModelRunner>,
        lock: Arc<Mutex<()>>,
    },
    Pulse {
        config: Arc<AgentConfig>,
        runner: Arc<dyn PulseRunner>,
        lock: Arc<Mutex<()>>,
    },
}

impl Job {
    async fn execute(self) -> Result<()> {
        match self {
            Job::Model {
                model,
                runner,
                lock,
            } => {
                let _guard = lock.lock().await;
                // 失败结果已由流水线记录并通知
                let outcome = runner.perform(model).await;
                debug!(model = outcome.model(), success = outcome.is_success(), "模型任务结束");
                Ok(())
            }
            Job::Pulse {
                config,
                runner,
                lock,
            } => {
                let _guard = lock.lock().await;
                runner.pulse(config).await
            }
        }
    }
}

pub struct Scheduler {
    config: watch::Receiver<Arc<AgentConfig>>,
    runner: Arc<dyn ModelRunner>,
    pulse: Option<Arc<dyn PulseRunner>>,
    jobs: BTreeMap<String, JobHandle>,
    model_lock: Arc<Mutex<()>>,
    pulse_lock: Arc<Mutex<()>>,
    cancel: Option<CancellationToken>,
    listening: bool,
}

impl Scheduler {
    pub fn new(
        config: watch::Receiver<Arc<AgentConfig>>,
        runner: Arc<dyn ModelRunner>,
        pulse: Option<Arc<dyn PulseRunner>>,
    ) -> Self {
        Self {
            config,
            runner,
            pulse,
            jobs: BTreeMap::new(),
            model_lock: Arc::new(Mutex::new(())),
            pulse_lock: Arc::new(Mutex::new(())),
            cancel: None,
            listening: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// 任务名称及其触发描述
    pub fn job_triggers(&self) -> Vec<(String, String)> {
        self.jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.trigger.clone()))
            .collect()
    }

    /// 按最新配置注册所有定时器
    ///
    /// 单个任务注册失败不影响其他任务，调度器仍处于运行状态，失败列表以错误返回。
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("调度器已在运行");
            return Ok(());
        }

        let config = self.config.borrow_and_update().clone();
        let cancel = CancellationToken::new();
        let mut failures = Vec::new();

        for (name, model) in &config.models {
            let Some(schedule) = &model.schedule else {
                debug!(model = %name, "未配置调度，跳过");
                continue;
            };
            match schedule.resolve() {
                Ok(trigger) => {
                    let job = Job::Model {
                        model: Arc::clone(model),
                        runner: Arc::clone(&self.runner),
                        lock: Arc::clone(&self.model_lock),
                    };
                    self.register(name, trigger, false, job, &cancel, &mut failures);
                }
                Err(e) => {
                    error!(job = %name, error = %e, "注册定时任务失败");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if config.pulse.enabled {
            match (&self.pulse, parse_duration(&config.pulse.every)) {
                (Some(runner), Ok(every)) => {
                    let job = Job::Pulse {
                        config: Arc::clone(&config),
                        runner: Arc::clone(runner),
                        lock: Arc::clone(&self.pulse_lock),
                    };
                    let trigger = Trigger::Interval { every, at: None };
                    self.register(PULSE_JOB, trigger, true, job, &cancel, &mut failures);
                }
                (None, _) => warn!("pulse 已启用但未提供实现，跳过"),
                (Some(_), Err(e)) => {
                    error!(job = PULSE_JOB, error = %e, "注册定时任务失败");
                    failures.push(format!("{PULSE_JOB}: {e}"));
                }
            }
        }

        self.cancel = Some(cancel);
        info!(jobs = self.jobs.len(), failed = failures.len(), "调度器已启动");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::schedule(failures.join("; ")))
        }
    }

    fn register(
        &mut self,
        name: &str,
        trigger: Trigger,
        immediate: bool,
        job: Job,
        cancel: &CancellationToken,
        failures: &mut Vec<String>,
    ) {
        if self.jobs.contains_key(name) {
            error!(job = %name, "任务名称重复");
            failures.push(format!("{name}: 任务名称重复"));
            return;
        }
        let description = trigger.to_string();
        info!(job = %name, trigger = %description, "注册定时任务");
        let task = spawn_timer(name.to_string(), trigger, immediate, job, cancel.child_token());
        self.jobs.insert(
            name.to_string(),
            JobHandle {
                trigger: description,
                task,
            },
        );
    }

    /// 取消所有定时器，不影响正在执行的任务
    pub fn stop(&mut self) {
        let Some(cancel) = self.cancel.take() else {
            return;
        };
        cancel.cancel();
        for (name, job) in std::mem::take(&mut self.jobs) {
            job.task.abort();
            debug!(job = %name, "定时器已取消");
        }
        info!("调度器已停止");
    }

    pub fn restart(&mut self) -> Result<()> {
        info!("重启调度器");
        self.stop();
        self.start()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 监听配置变更并重启调度器，每个调度器只会注册一次
pub async fn spawn_config_listener(scheduler: Arc<Mutex<Scheduler>>) -> Option<JoinHandle<()>> {
    let mut changes = {
        let mut guard = scheduler.lock().await;
        if guard.listening {
            debug!("配置监听已注册");
            return None;
        }
        guard.listening = true;
        guard.config.clone()
    };
    changes.mark_unchanged();

    Some(tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let mut guard = scheduler.lock().await;
            if !guard.is_running() {
                continue;
            }
            info!("配置已变更");
            if let Err(e) = guard.restart() {
                warn!(error = %e, "部分定时任务注册失败");
            }
        }
        debug!("配置通道已关闭，停止监听");
    }))
}

fn spawn_timer(
    name: String,
    trigger: Trigger,
    immediate: bool,
    job: Job,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Local::now().naive_local();
        let first = if immediate {
            Some(Duration::ZERO)
        } else {
            trigger.first_delay(started)
        };
        let Some(first) = first else {
            warn!(job = %name, "没有可用的触发时间");
            return;
        };
        let mut deadline = Instant::now() + first;
        // 计划触发的墙上时刻
        let mut tick = fire_time(started, first);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            debug!(job = %name, "触发任务");
            tokio::spawn(supervise(name.clone(), job.clone()));

            let next = match &trigger {
                Trigger::Interval { every, .. } => Some(deadline + *every),
                Trigger::Cron(_) => {
                    let now = Local::now().naive_local();
                    trigger.next_delay(now, tick).map(|delay| {
                        tick = fire_time(now, delay);
                        Instant::now() + delay
                    })
                }
            };
            match next {
                Some(next) => deadline = next,
                None => {
                    warn!(job = %name, "没有下一次触发时间，定时器退出");
                    break;
                }
            }
        }
    })
}

/// 在独立 task 中执行任务体，错误与崩溃只记录日志
async fn supervise(name: String, job: Job) {
    match tokio::spawn(job.execute()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(job = %name, error = %e, "任务执行失败"),
        Err(e) if e.is_panic() => error!(job = %name, "任务执行崩溃"),
        Err(e) => warn!(job = %name, error = %e, "任务被取消"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::model::Outcome;
    use crate::schedule::ScheduleConfig;
    use crate::storage::tests::{model_with, storage};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRunner {
        hold: Duration,
        panic: bool,
        started: AtomicUsize,
        finished: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl CountingRunner {
        fn holding(hold: Duration) -> Self {
            Self {
                hold,
                ..Default::default()
            }
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelRunner for CountingRunner {
        async fn perform(&self, model: Arc<ModelConfig>) -> Outcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("runner exploded");
            }
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            if !self.hold.is_zero() {
                tokio::time::sleep(self.hold).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            Outcome::Finished {
                model: model.name.clone(),
                size: 0,
            }
        }
    }

    #[derive(Default)]
    struct CountingPulse {
        count: AtomicUsize,
    }

    #[async_trait]
    impl PulseRunner for CountingPulse {
        async fn pulse(&self, _config: Arc<AgentConfig>) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config_with(models: &[(&str, ScheduleConfig)]) -> AgentConfig {
        let mut config = AgentConfig::empty();
        for (name, schedule) in models {
            let mut model = model_with(name, Path::new("/tmp/launch-agent-test"), vec![storage("local", 0)]);
            model.schedule = Some(schedule.clone());
            config.models.insert(name.to_string(), Arc::new(model));
        }
        config
    }

    fn scheduler(store: &ConfigStore, runner: Arc<CountingRunner>) -> Scheduler {
        Scheduler::new(store.subscribe(), runner, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_after_full_period() {
        let store = ConfigStore::new(config_with(&[("daily-db", ScheduleConfig::every("10s"))]));
        let runner = Arc::new(CountingRunner::default());
        let mut scheduler = scheduler(&store, runner.clone());
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(runner.started(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runner.started(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runner.started(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_models_never_run_concurrently() {
        let store = ConfigStore::new(config_with(&[
            ("a", ScheduleConfig::every("10s")),
            ("b", ScheduleConfig::every("10s")),
        ]));
        let runner = Arc::new(CountingRunner::holding(Duration::from_secs(15)));
        let mut scheduler = scheduler(&store, runner.clone());
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(runner.finished() >= 2);
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_mirrors_new_config() {
        let store = ConfigStore::new(config_with(&[
            ("a", ScheduleConfig::every("1h")),
            ("b", ScheduleConfig::cron("0 3 * * *")),
        ]));
        let mut scheduler = scheduler(&store, Arc::new(CountingRunner::default()));
        scheduler.start().unwrap();
        assert_eq!(scheduler.job_names(), vec!["a", "b"]);

        store.replace(config_with(&[("c", ScheduleConfig::every("5m"))]));
        scheduler.restart().unwrap();
        assert_eq!(scheduler.job_names(), vec!["c"]);
        assert_eq!(
            scheduler.job_triggers(),
            vec![("c".to_string(), "every 5m".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_in_flight_run() {
        let store = ConfigStore::new(config_with(&[("daily-db", ScheduleConfig::every("10s"))]));
        let runner = Arc::new(CountingRunner::holding(Duration::from_secs(30)));
        let mut scheduler = scheduler(&store, runner.clone());
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runner.started(), 1);
        assert_eq!(runner.finished(), 0);

        store.replace(config_with(&[("other", ScheduleConfig::every("1h"))]));
        scheduler.restart().unwrap();

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(runner.started(), 1);
        assert_eq!(runner.finished(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let store = ConfigStore::new(config_with(&[("daily-db", ScheduleConfig::every("10s"))]));
        let runner = Arc::new(CountingRunner::default());
        let mut scheduler = scheduler(&store, runner.clone());

        scheduler.stop();
        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert_eq!(scheduler.job_names().len(), 1);

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.job_names().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_schedule_does_not_block_others() {
        let store = ConfigStore::new(config_with(&[
            ("bad", ScheduleConfig::cron("not a cron")),
            ("both", ScheduleConfig {
                cron: Some("* * * * *".to_string()),
                every: Some("1m".to_string()),
                at: None,
            }),
            ("good", ScheduleConfig::every("10s")),
        ]));
        let runner = Arc::new(CountingRunner::default());
        let mut scheduler = scheduler(&store, runner.clone());

        let err = scheduler.start().unwrap_err().to_string();
        assert!(err.contains("bad"));
        assert!(err.contains("both"));
        assert!(scheduler.is_running());
        assert_eq!(scheduler.job_names(), vec!["good"]);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runner.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_keeps_ticking() {
        let store = ConfigStore::new(config_with(&[("daily-db", ScheduleConfig::every("10s"))]));
        let runner = Arc::new(CountingRunner {
            panic: true,
            ..Default::default()
        });
        let mut scheduler = scheduler(&store, runner.clone());
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runner.started(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_fires_immediately_then_every_interval() {
        let mut config = config_with(&[]);
        config.pulse.enabled = true;
        config.pulse.every = "1m".to_string();
        let store = ConfigStore::new(config);
        let pulse = Arc::new(CountingPulse::default());
        let mut scheduler = Scheduler::new(
            store.subscribe(),
            Arc::new(CountingRunner::default()),
            Some(pulse.clone() as Arc<dyn PulseRunner>),
        );
        scheduler.start().unwrap();
        assert_eq!(scheduler.job_names(), vec![PULSE_JOB]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pulse.count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(pulse.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_runs_during_long_backup() {
        let mut config = config_with(&[("daily-db", ScheduleConfig::every("10s"))]);
        config.pulse.enabled = true;
        config.pulse.every = "1m".to_string();
        let store = ConfigStore::new(config);
        let runner = Arc::new(CountingRunner::holding(Duration::from_secs(3600)));
        let pulse = Arc::new(CountingPulse::default());
        let mut scheduler = Scheduler::new(
            store.subscribe(),
            runner.clone(),
            Some(pulse.clone() as Arc<dyn PulseRunner>),
        );
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runner.started(), 1);
        let before = pulse.count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(runner.finished(), 0);
        assert!(pulse.count.load(Ordering::SeqCst) >= before + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_listener_restarts_once_registered() {
        let store = ConfigStore::new(config_with(&[("a", ScheduleConfig::every("1h"))]));
        let scheduler = Arc::new(Mutex::new(scheduler(&store, Arc::new(CountingRunner::default()))));
        scheduler.lock().await.start().unwrap();

        let listener = spawn_config_listener(scheduler.clone()).await;
        assert!(listener.is_some());
        assert!(spawn_config_listener(scheduler.clone()).await.is_none());

        store.replace(config_with(&[("b", ScheduleConfig::every("1h"))]));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.lock().await.job_names(), vec!["b"]);
    }
}
