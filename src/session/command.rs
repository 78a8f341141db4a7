//! LLM 命令：回复必须是带 action / message 的 JSON 对象

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::TaskError;

/// 用户意图分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// 所有必填信息齐全时创建任务
    Create,
    /// 取消指定名称的任务
    Cancel,
    /// 列出所有活跃任务
    List,
    /// 查询指定任务的进度
    Status,
    /// 其他（闲聊、信息不全的创建请求）
    Other,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Cancel => "cancel",
            Action::List => "list",
            Action::Status => "status",
            Action::Other => "other",
        };
        f.write_str(s)
    }
}

/// LLM 回复的命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskCommand {
    pub action: Action,
    /// 给用户的回复
    pub message: String,
    /// 任务的唯一名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    /// 任务类型：reminder / flight_price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// 任务参数，字段随任务类型变化
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<Value>,
}

impl TaskCommand {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            action: Action::Other,
            message: message.into(),
            task_name: None,
            task_type: None,
            task_spec: None,
        }
    }
}

/// 命令 JSON Schema（写入 system prompt）
pub fn command_schema() -> String {
    let schema = schemars::schema_for!(TaskCommand);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 去掉模型偶尔加上的 ``` / ```json 围栏
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// 解析 LLM 回复；格式错误为终止性错误，不重试
pub fn parse_command(raw: &str) -> Result<TaskCommand, TaskError> {
    let malformed =
        |reason: String| TaskError::MalformedCommand(format!("{}.\nRaw response:\n{}", reason, raw));

    let value: Value = serde_json::from_str(strip_fences(raw)).map_err(|e| malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(malformed("response is not a JSON object".to_string()));
    }
    for property in ["action", "message"] {
        if value.get(property).is_none() {
            return Err(malformed(format!("property '{}' is missing", property)));
        }
    }

    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_create_command() {
        let cmd = parse_command(
            r#"{"action":"create","message":"ok","task_name":"r1","task_type":"reminder",
                "task_spec":{"date":"2030-01-01T10:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(cmd.action, Action::Create);
        assert_eq!(cmd.task_name.as_deref(), Some("r1"));
        assert_eq!(cmd.task_spec, Some(json!({"date": "2030-01-01T10:00:00Z"})));
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let cmd = parse_command("```json\n{\"action\":\"list\",\"message\":\"\"}\n```").unwrap();
        assert_eq!(cmd.action, Action::List);
    }

    #[test]
    fn test_missing_properties_are_malformed() {
        let err = parse_command(r#"{"message":"hi"}"#).unwrap_err();
        assert!(matches!(err, TaskError::MalformedCommand(ref m) if m.contains("'action'")));

        let err = parse_command(r#"{"action":"list"}"#).unwrap_err();
        assert!(matches!(err, TaskError::MalformedCommand(ref m) if m.contains("'message'")));
    }

    #[test]
    fn test_unknown_action_and_plain_text_are_malformed() {
        assert!(matches!(
            parse_command(r#"{"action":"explode","message":"x"}"#),
            Err(TaskError::MalformedCommand(_))
        ));
        let err = parse_command("Sure, I'll do that!").unwrap_err();
        assert!(err.is_terminal());
        assert!(err.to_string().contains("Sure, I'll do that!"));
    }

    #[test]
    fn test_schema_lists_actions() {
        let schema = command_schema();
        for action in ["create", "cancel", "list", "status", "other"] {
            assert!(schema.contains(action), "schema misses {action}");
        }
        assert!(schema.contains("task_spec"));
    }
}
