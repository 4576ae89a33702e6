//! 调度表达式求值
//!
//! 根据任务类型与调度表达式计算下一次可执行时间，纯函数，不做任何 I/O。
//!
//! | 类型 | 表达式 | 下一次执行时间 |
//! |------|--------|----------------|
//! | `Immediate` | 忽略 | 未执行过时为 `now`，否则无 |
//! | `ScheduledAt` | RFC 3339 时间戳 | 未执行过且不早于 `now` 时为该时间，否则无 |
//! | `Cron` | 5 段（分钟精度）或 6 段（首段为秒） | 严格晚于 `max(now, last_run)` 的最早匹配时间 |
//! | `Interval` | 不超过 100 年的正整数秒数 | `last_run + interval`（若晚于 `now`），否则 `now` |
//!
//! 星期字段采用标准 crontab 约定：`0` 与 `7` 表示周日，`1`–`6` 表示周一到周六。

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use scheduler_core::models::TaskType;
use scheduler_core::{SchedulerError, SchedulerResult};

/// 间隔上限（100 年）
pub const MAX_INTERVAL_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

/// 计算任务的下一次执行时间
pub fn next_run(
    task_type: TaskType,
    expr: &str,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    match task_type {
        TaskType::Immediate => Ok(last_run.is_none().then_some(now)),
        TaskType::ScheduledAt => {
            let at = parse_scheduled_at(expr)?;
            Ok((last_run.is_none() && at >= now).then_some(at))
        }
        TaskType::Cron => {
            let from = last_run.map_or(now, |last| last.max(now));
            CronScheduler::new(expr)?
                .next_execution_time(from)
                .map(Some)
                .ok_or_else(|| SchedulerError::invalid_schedule(expr, "表达式没有后续触发时间"))
        }
        TaskType::Interval => {
            let interval = parse_interval(expr)?;
            let Some(last) = last_run else {
                return Ok(Some(now));
            };
            let next = last
                .checked_add_signed(interval)
                .ok_or_else(|| SchedulerError::invalid_schedule(expr, "下次执行时间超出可表示范围"))?;
            Ok(Some(next.max(now)))
        }
    }
}

/// 校验调度表达式，不计算具体时间
pub fn validate_schedule(task_type: TaskType, expr: &str) -> SchedulerResult<()> {
    match task_type {
        TaskType::Immediate => Ok(()),
        TaskType::ScheduledAt => parse_scheduled_at(expr).map(|_| ()),
        TaskType::Cron => CronScheduler::validate_cron_expression(expr),
        TaskType::Interval => parse_interval(expr).map(|_| ()),
    }
}

pub fn parse_scheduled_at(expr: &str) -> SchedulerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(expr.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| SchedulerError::invalid_schedule(expr, format!("不是合法的RFC 3339时间: {e}")))
}

pub fn parse_interval(expr: &str) -> SchedulerResult<Duration> {
    let seconds: i64 = expr
        .trim()
        .parse()
        .map_err(|_| SchedulerError::invalid_schedule(expr, "间隔必须是正整数秒数"))?;
    if seconds <= 0 {
        return Err(SchedulerError::invalid_schedule(expr, "间隔必须大于0"));
    }
    if seconds > MAX_INTERVAL_SECONDS {
        return Err(SchedulerError::invalid_schedule(
            expr,
            format!("间隔不能超过{MAX_INTERVAL_SECONDS}秒"),
        ));
    }
    Duration::try_seconds(seconds)
        .ok_or_else(|| SchedulerError::invalid_schedule(expr, "间隔超出范围"))
}

/// CRON表达式解析和调度工具
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    /// 解析 5 段或 6 段 CRON 表达式
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = normalize_cron(cron_expr)?;
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::invalid_schedule(cron_expr, e.to_string()))?;

        Ok(Self { schedule })
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

/// 转换为 `cron` crate 使用的 6 段格式（秒 分 时 日 月 周）
fn normalize_cron(expr: &str) -> SchedulerResult<String> {
    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => {
            return Err(SchedulerError::invalid_schedule(
                expr,
                format!("需要5段或6段，实际为{n}段"),
            ))
        }
    }
    fields[5] = translate_day_of_week(&fields[5])
        .ok_or_else(|| SchedulerError::invalid_schedule(expr, "星期字段无效"))?;
    Ok(fields.join(" "))
}

/// 标准星期编号（0/7 = 周日）转换为 `cron` crate 的编号（1 = 周日 ... 7 = 周六）
///
/// 星期名称与 `*`、`?` 原样保留。
fn translate_day_of_week(field: &str) -> Option<String> {
    fn shift(token: &str) -> Option<u8> {
        match token.parse::<u8>().ok()? {
            n @ 0..=6 => Some(n + 1),
            7 => Some(1),
            _ => None,
        }
    }

    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let step_suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

        if !range.starts_with(|c: char| c.is_ascii_digit()) {
            items.push(item.to_string());
            continue;
        }

        match range.split_once('-') {
            Some((start, end)) => {
                let start_num: u8 = start.parse().ok()?;
                let end_num: u8 = end.parse().ok()?;
                let from = shift(start)?;
                if start_num == 7 && end_num == 7 {
                    // 只包含周日
                    items.push("1".to_string());
                } else if end_num == 7 && start_num > 0 && step.is_none() {
                    // 以周日结尾的区间拆成两段
                    items.push(if from == 7 {
                        "7".to_string()
                    } else {
                        format!("{from}-7")
                    });
                    items.push("1".to_string());
                } else if end_num == 7 && start_num == 0 {
                    items.push(format!("1-7{step_suffix}"));
                } else {
                    items.push(format!("{from}-{}{step_suffix}", shift(end)?));
                }
            }
            None => items.push(format!("{}{step_suffix}", shift(range)?)),
        }
    }
    Some(items.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_cron_hourly_from_half_past() {
        let next = next_run(TaskType::Cron, "0 * * * *", at(12, 0, 30), None).unwrap();
        assert_eq!(next, Some(at(13, 0, 0)));
    }

    #[test]
    fn test_cron_is_strictly_after_last_run() {
        // last_run 正好落在触发点上时不能再次返回同一时间
        let next = next_run(TaskType::Cron, "0 * * * *", at(12, 0, 0), Some(at(13, 0, 0))).unwrap();
        assert_eq!(next, Some(at(14, 0, 0)));

        let next = next_run(TaskType::Cron, "0 * * * *", at(13, 0, 0), Some(at(12, 0, 0))).unwrap();
        assert_eq!(next, Some(at(14, 0, 0)));
    }

    #[test]
    fn test_cron_strictly_after_max_of_now_and_last_run() {
        let exprs = ["*/5 * * * *", "0 0 * * *", "30 */2 * * * *", "15 9 * * 1-5"];
        let mut now = at(0, 0, 0);
        for step in 0..200 {
            let last_run = (step % 3 == 0).then(|| now + Duration::minutes(7 * step as i64 % 90));
            for expr in exprs {
                let next = next_run(TaskType::Cron, expr, now, last_run).unwrap().unwrap();
                let floor = last_run.map_or(now, |l| l.max(now));
                assert!(next > floor, "{expr}: {next} <= {floor}");
            }
            now += Duration::seconds(1237);
        }
    }

    #[test]
    fn test_six_field_cron_keeps_seconds() {
        let next = next_run(TaskType::Cron, "30 * * * * *", at(12, 0, 30), None).unwrap();
        assert_eq!(next, Some(at(12, 1, 30)));
    }

    #[test]
    fn test_weekday_numbers_follow_crontab() {
        // 2024-01-01 是周一
        let scheduler = CronScheduler::new("0 9 * * 1-5").unwrap();
        let fridays_evening = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();
        let next = scheduler.next_execution_time(fridays_evening).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.day(), 8);

        let sunday = CronScheduler::new("0 0 * * 0").unwrap();
        assert_eq!(
            sunday.next_execution_time(at(0, 0, 0)).unwrap().weekday(),
            Weekday::Sun
        );
        let sunday = CronScheduler::new("0 0 * * 7").unwrap();
        assert_eq!(
            sunday.next_execution_time(at(0, 0, 0)).unwrap().weekday(),
            Weekday::Sun
        );

        let weekend = CronScheduler::new("0 0 * * 6-7").unwrap();
        let days: Vec<Weekday> = weekend
            .upcoming_times(at(0, 0, 0), 2)
            .iter()
            .map(|t| t.weekday())
            .collect();
        assert_eq!(days, vec![Weekday::Sat, Weekday::Sun]);

        assert!(CronScheduler::new("0 0 * * MON-FRI").is_ok());
        assert!(CronScheduler::new("0 0 * * 8").is_err());
    }

    #[test]
    fn test_sunday_only_range() {
        let sundays = CronScheduler::new("0 0 * * 7-7").unwrap();
        let days: Vec<Weekday> = sundays
            .upcoming_times(at(0, 0, 0), 3)
            .iter()
            .map(|t| t.weekday())
            .collect();
        assert_eq!(days, vec![Weekday::Sun; 3]);
        assert_eq!(translate_day_of_week("7-7").as_deref(), Some("1"));
        assert_eq!(translate_day_of_week("0-7").as_deref(), Some("1-7"));
    }

    #[test]
    fn test_malformed_cron_is_invalid_schedule() {
        for expr in ["", "* * *", "61 * * * *", "* * * * * * *", "not a cron"] {
            assert!(
                matches!(
                    next_run(TaskType::Cron, expr, at(0, 0, 0), None),
                    Err(SchedulerError::InvalidSchedule { .. })
                ),
                "{expr:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_interval_sequence_has_zero_drift() {
        let t0 = at(12, 0, 0);
        assert_eq!(next_run(TaskType::Interval, "5", t0, None).unwrap(), Some(t0));

        let mut due = t0;
        for k in 1..=100 {
            // 调度循环在到期后稍晚一点才处理
            let now = due + Duration::milliseconds(300);
            let next = next_run(TaskType::Interval, "5", now, Some(due)).unwrap().unwrap();
            assert_eq!(next, t0 + Duration::seconds(5 * k));
            due = next;
        }
    }

    #[test]
    fn test_interval_catches_up_to_now_when_late() {
        let t0 = at(12, 0, 0);
        let now = t0 + Duration::seconds(12);
        assert_eq!(
            next_run(TaskType::Interval, "5", now, Some(t0)).unwrap(),
            Some(now)
        );
    }

    #[test]
    fn test_interval_rejects_non_positive_and_non_numeric() {
        for expr in ["0", "-5", "five", "", "1.5"] {
            assert!(matches!(
                validate_schedule(TaskType::Interval, expr),
                Err(SchedulerError::InvalidSchedule { .. })
            ));
        }
    }

    #[test]
    fn test_interval_upper_bound() {
        assert!(validate_schedule(TaskType::Interval, &MAX_INTERVAL_SECONDS.to_string()).is_ok());
        for expr in [
            (MAX_INTERVAL_SECONDS + 1).to_string(),
            "9000000000000".to_string(),
            i64::MAX.to_string(),
        ] {
            assert!(matches!(
                validate_schedule(TaskType::Interval, &expr),
                Err(SchedulerError::InvalidSchedule { .. })
            ));
            assert!(matches!(
                next_run(TaskType::Interval, &expr, at(12, 0, 0), Some(at(12, 0, 0))),
                Err(SchedulerError::InvalidSchedule { .. })
            ));
        }
    }

    #[test]
    fn test_interval_past_representable_range_is_invalid_schedule() {
        let last = DateTime::<Utc>::MAX_UTC - Duration::seconds(10);
        assert!(matches!(
            next_run(TaskType::Interval, "60", last, Some(last)),
            Err(SchedulerError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_scheduled_at_runs_once() {
        let target = "2024-01-01T15:00:00Z";
        let now = at(12, 0, 0);
        assert_eq!(
            next_run(TaskType::ScheduledAt, target, now, None).unwrap(),
            Some(at(15, 0, 0))
        );
        assert_eq!(
            next_run(TaskType::ScheduledAt, target, now, Some(at(15, 0, 0))).unwrap(),
            None
        );
        assert_eq!(
            next_run(TaskType::ScheduledAt, target, at(16, 0, 0), None).unwrap(),
            None
        );

        let offset = "2024-01-01T23:00:00+08:00";
        assert_eq!(
            next_run(TaskType::ScheduledAt, offset, now, None).unwrap(),
            Some(at(15, 0, 0))
        );
        assert!(validate_schedule(TaskType::ScheduledAt, "tomorrow").is_err());
    }

    #[test]
    fn test_immediate_runs_once() {
        let now = at(12, 0, 0);
        assert_eq!(next_run(TaskType::Immediate, "", now, None).unwrap(), Some(now));
        assert_eq!(
            next_run(TaskType::Immediate, "anything", now, Some(now)).unwrap(),
            None
        );
    }
}
