//! 调度描述：配置中的 `schedule` 表以及注册时解析出的触发器

pub mod cron;

use crate::error::{AgentError, Result};
use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use cron::CronExpr;

/// 模型的调度配置
///
/// 只保存原始字符串，合法性（cron 与 every 二选一、表达式可解析）在
/// 调度器注册任务时通过 [`ScheduleConfig::resolve`] 检查。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

impl ScheduleConfig {
    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            cron: Some(expr.into()),
            ..Default::default()
        }
    }

    pub fn every(every: impl Into<String>) -> Self {
        Self {
            every: Some(every.into()),
            ..Default::default()
        }
    }

    pub fn with_at(mut self, at: impl Into<String>) -> Self {
        self.at = Some(at.into());
        self
    }

    /// 解析为可执行的触发器
    pub fn resolve(&self) -> Result<Trigger> {
        let cron = self.cron.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let every = self.every.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (cron, every) {
            (Some(_), Some(_)) => Err(AgentError::schedule("cron 与 every 不能同时配置")),
            (None, None) => Err(AgentError::schedule("cron 与 every 必须配置其一")),
            (Some(expr), None) => Ok(Trigger::Cron(CronExpr::parse(expr)?)),
            (None, Some(every)) => {
                let at = self
                    .at
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(parse_time_of_day)
                    .transpose()?;
                Ok(Trigger::Interval {
                    every: parse_duration(every)?,
                    at,
                })
            }
        }
    }
}

impl fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cron) = &self.cron {
            return write!(f, "cron {cron}");
        }
        match (&self.every, &self.at) {
            (Some(every), Some(at)) => write!(f, "every {every} at {at}"),
            (Some(every), None) => write!(f, "every {every}"),
            _ => f.write_str("disabled"),
        }
    }
}

/// 模型调度描述的展示文本，未配置调度时为 `disabled`
pub fn describe(schedule: Option<&ScheduleConfig>) -> String {
    schedule
        .map(ToString::to_string)
        .unwrap_or_else(|| "disabled".to_string())
}

/// 解析后的触发器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Cron(CronExpr),
    Interval {
        every: Duration,
        at: Option<NaiveTime>,
    },
}

impl Trigger {
    /// 距离第一次触发的等待时间
    ///
    /// 间隔任务不会立即触发：配置了 `at` 时等到下一个该时刻，否则等待一个完整间隔。
    pub fn first_delay(&self, now: NaiveDateTime) -> Option<Duration> {
        match self {
            Trigger::Cron(expr) => cron_delay(expr, now),
            Trigger::Interval { every, at: None } => Some(*every),
            Trigger::Interval { at: Some(at), .. } => {
                let today = now.date().and_time(*at);
                let next = if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                };
                (next - now).to_std().ok()
            }
        }
    }

    /// 触发后距离下一次触发的等待时间，`fired` 为刚触发的计划时刻
    ///
    /// 墙上时钟落后于计划时刻时（校时或时钟回拨）从计划时刻之后计算，同一时刻不会触发两次。
    pub fn next_delay(&self, now: NaiveDateTime, fired: NaiveDateTime) -> Option<Duration> {
        match self {
            Trigger::Cron(expr) => {
                let next = expr.next_after(&now.max(fired))?;
                (next - now).to_std().ok()
            }
            Trigger::Interval { every, .. } => Some(*every),
        }
    }
}

/// `now` 之后 `delay` 的时刻
pub fn fire_time(now: NaiveDateTime, delay: Duration) -> NaiveDateTime {
    ChronoDuration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(NaiveDateTime::MAX)
}

fn cron_delay(expr: &CronExpr, now: NaiveDateTime) -> Option<Duration> {
    let next = expr.next_after(&now)?;
    (next - now).to_std().ok()
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(expr) => write!(f, "cron {expr}"),
            Trigger::Interval { every, at: None } => write!(f, "every {}", format_duration(*every)),
            Trigger::Interval { every, at: Some(at) } => {
                write!(f, "every {} at {}", format_duration(*every), at.format("%H:%M:%S"))
            }
        }
    }
}

/// 解析时长字符串，支持 `ms`、`s`、`m`、`h`、`d` 及组合形式（如 `1h30m`）
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AgentError::schedule("时长不能为空"));
    }

    let mut total_ms: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(AgentError::schedule(format!("无效的时长: {input}")));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| AgentError::schedule(format!("无效的时长: {input}")))?;
        rest = &rest[digits..];

        let unit_len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let factor: u64 = match unit {
            "ms" => 1,
            "s" | "" => 1_000,
            "m" => 60 * 1_000,
            "h" => 60 * 60 * 1_000,
            "d" => 24 * 60 * 60 * 1_000,
            other => {
                return Err(AgentError::schedule(format!(
                    "无效的时长单位 '{other}': {input}"
                )));
            }
        };
        total_ms = value
            .checked_mul(factor)
            .and_then(|v| total_ms.checked_add(v))
            .ok_or_else(|| AgentError::schedule(format!("时长过大: {input}")))?;
    }

    if total_ms == 0 {
        return Err(AgentError::schedule(format!("时长必须大于 0: {input}")));
    }
    Ok(Duration::from_millis(total_ms))
}

/// 把时长格式化为紧凑形式，例如 `1h30m`
pub fn format_duration(duration: Duration) -> String {
    let mut ms = duration.as_millis() as u64;
    if ms == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [
        ("d", 86_400_000u64),
        ("h", 3_600_000),
        ("m", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ] {
        if ms >= size {
            out.push_str(&format!("{}{unit}", ms / size));
            ms %= size;
        }
    }
    out
}

/// 解析 `HH:MM` 或 `HH:MM:SS` 形式的本地时刻
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
        .map_err(|_| AgentError::schedule(format!("无效的时刻 '{input}'，应为 HH:MM 或 HH:MM:SS")))
}
