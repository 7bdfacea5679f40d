//! 标准 5 字段 cron 表达式解析与下一次触发时间计算
//!
//! ```text
//! ┌───────────── 分 (0-59)
//! │ ┌───────────── 时 (0-23)
//! │ │ ┌───────────── 日 (1-31)
//! │ │ │ ┌───────────── 月 (1-12)
//! │ │ │ │ ┌───────────── 周 (0-7, 0 与 7 均为周日)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! 时间均按本地时间（`NaiveDateTime`）计算，由调用方负责时区换算。

use crate::constants::schedule::{CRON_FIELDS_COUNT, CRON_SEARCH_LIMIT_MINUTES};
use crate::error::{AgentError, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::BTreeSet;
use std::fmt;

/// cron 表达式中的单个字段
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
    min: u32,
    max: u32,
}

impl CronField {
    fn parse(expr: &str, min: u32, max: u32, name: &str) -> Result<Self> {
        let mut field = Self {
            values: BTreeSet::new(),
            min,
            max,
        };
        for part in expr.split(',') {
            field.parse_part(part.trim(), name)?;
        }
        Ok(field)
    }

    fn parse_part(&mut self, part: &str, name: &str) -> Result<()> {
        // 步长: */5, 0-30/5, 10/15
        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step.parse::<u32>().map_err(|_| {
                    AgentError::schedule(format!("{name} 字段步长无效: {part}"))
                })?;
                if step == 0 {
                    return Err(AgentError::schedule(format!("{name} 字段步长不能为 0")));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (self.min, self.max)
        } else if let Some((start, end)) = range_part.split_once('-') {
            let start = self.parse_value(start, name)?;
            let end = self.parse_value(end, name)?;
            if start > end {
                return Err(AgentError::schedule(format!(
                    "{name} 字段范围无效: {start}-{end}"
                )));
            }
            (start, end)
        } else {
            let value = self.parse_value(range_part, name)?;
            // `10/15` 表示从 10 开始每 15 个单位
            if step > 1 { (value, self.max) } else { (value, value) }
        };

        let mut value = start;
        while value <= end {
            self.values.insert(value);
            value += step;
        }
        Ok(())
    }

    fn parse_value(&self, raw: &str, name: &str) -> Result<u32> {
        let value = raw
            .parse::<u32>()
            .map_err(|_| AgentError::schedule(format!("{name} 字段取值无效: {raw}")))?;
        if value < self.min || value > self.max {
            return Err(AgentError::schedule(format!(
                "{name} 字段取值 {value} 超出范围 [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(value)
    }

    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    fn is_full(&self) -> bool {
        self.values.len() as u32 == self.max - self.min + 1
    }

    /// 当前小时内 >= value 的下一个匹配值
    fn next_from(&self, value: u32) -> Option<u32> {
        self.values.range(value..).next().copied()
    }
}

/// 解析后的 cron 表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    expr: String,
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != CRON_FIELDS_COUNT {
            return Err(AgentError::schedule(format!(
                "cron 表达式应包含 {CRON_FIELDS_COUNT} 个字段，实际为 {}: {expr}",
                parts.len()
            )));
        }

        let mut day_of_week = CronField::parse(parts[4], 0, 7, "周")?;
        // 7 与 0 都表示周日
        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }
        day_of_week.max = 6;

        Ok(Self {
            expr: expr.trim().to_string(),
            minute: CronField::parse(parts[0], 0, 59, "分")?,
            hour: CronField::parse(parts[1], 0, 23, "时")?,
            day_of_month: CronField::parse(parts[2], 1, 31, "日")?,
            month: CronField::parse(parts[3], 1, 12, "月")?,
            day_of_week,
        })
    }

    /// 日期是否命中（日与周同时受限时任一命中即可，与 crontab 行为一致）
    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let dom = self.day_of_month.matches(date.day());
        let dow = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday());
        match (self.day_of_month.is_full(), self.day_of_week.is_full()) {
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.matches_date(dt.date())
            && self.hour.matches(dt.hour())
            && self.minute.matches(dt.minute())
    }

    /// 计算严格晚于 `after` 的下一次触发时间（精确到分钟）
    pub fn next_after(&self, after: &NaiveDateTime) -> Option<NaiveDateTime> {
        let start = after.date().and_hms_opt(after.hour(), after.minute(), 0)? + Duration::minutes(1);
        let limit = start + Duration::minutes(i64::from(CRON_SEARCH_LIMIT_MINUTES));
        let mut current = start;

        while current <= limit {
            if !self.matches_date(current.date()) {
                current = current.date().succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.hour.matches(current.hour()) {
                current = match self.hour.next_from(current.hour() + 1) {
                    Some(hour) => current.date().and_hms_opt(hour, 0, 0)?,
                    None => current.date().succ_opt()?.and_time(NaiveTime::MIN),
                };
                continue;
            }
            match self.minute.next_from(current.minute()) {
                Some(minute) => return current.date().and_hms_opt(current.hour(), minute, 0),
                None => {
                    current = current.date().and_hms_opt(current.hour(), 0, 0)? + Duration::hours(1);
                }
            }
        }

        None
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}
