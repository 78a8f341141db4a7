//! 定时提醒
//!
//! 参数 {date, description?}；date 为 RFC 3339、无时区的 ISO 日期时间（按本地时间）或纯日期（本地零点）。
//! 目标时间不晚于当前时间时在解析阶段即报 PastDeadline，任务不会被派发。

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::workflow::{required_str, RunOutcome, TaskWorkflow};
use crate::core::TaskError;
use crate::durable::WorkflowContext;

pub const REMINDER: &str = "reminder";

const TIMESTAMP_KEY: &str = "timestamp";

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// 规范化后的提醒参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderParams {
    /// 目标时间（毫秒时间戳）
    pub timestamp_ms: i64,
    pub description: Option<String>,
}

/// 解析提醒时间
pub fn parse_target(raw: &str) -> Result<DateTime<Utc>, TaskError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let local = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });

    local
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TaskError::InvalidParams(format!("cannot parse date '{}'", raw)))
}

#[derive(Debug, Default)]
pub struct ReminderWorkflow;

impl ReminderWorkflow {
    pub fn new() -> Self {
        Self
    }

    fn outcome(description: Option<&str>) -> String {
        match description {
            Some(d) if !d.is_empty() => format!("It is time: {}", d),
            _ => "It is time!".to_string(),
        }
    }
}

#[async_trait]
impl TaskWorkflow for ReminderWorkflow {
    fn type_name(&self) -> &str {
        REMINDER
    }

    fn parse_params(&self, _task_name: &str, raw: &Value) -> Result<Value, TaskError> {
        let date = required_str(raw, "date")?;
        let target = parse_target(date)?;
        if target <= Utc::now() {
            return Err(TaskError::PastDeadline(format!("{} is not in the future", date)));
        }

        let description = match raw.get("description") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(TaskError::InvalidParams(format!(
                    "field 'description' must be a string, got {}",
                    other
                )))
            }
        };

        Ok(serde_json::to_value(ReminderParams {
            timestamp_ms: target.timestamp_millis(),
            description,
        })?)
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> Result<RunOutcome, TaskError> {
        let params: ReminderParams = serde_json::from_value(params)
            .map_err(|e| TaskError::InvalidParams(e.to_string()))?;

        let now = Utc::now().timestamp_millis();
        let resumed = ctx.state().get::<i64>(TIMESTAMP_KEY).await?.is_some();
        if !resumed && params.timestamp_ms <= now {
            return Err(TaskError::PastDeadline(format!(
                "reminder target {} ms is not in the future",
                params.timestamp_ms
            )));
        }

        ctx.state().set(TIMESTAMP_KEY, &params.timestamp_ms).await?;

        let delay = std::time::Duration::from_millis((params.timestamp_ms - now).max(0) as u64);
        tracing::debug!("Reminder {} sleeping {:?}", ctx.instance_id(), delay);

        if ctx.sleep_or_cancel(delay).await {
            return Ok(RunOutcome::Cancelled);
        }

        Ok(RunOutcome::Completed(Self::outcome(params.description.as_deref())))
    }

    async fn status(&self, ctx: &WorkflowContext) -> Result<Option<Value>, TaskError> {
        let timestamp = match ctx.state().get::<i64>(TIMESTAMP_KEY).await? {
            Some(ts) => ts,
            None => return Ok(None),
        };
        let remaining = (timestamp - Utc::now().timestamp_millis()).max(0);
        Ok(Some(json!({ "remainingTime": remaining })))
    }
}
