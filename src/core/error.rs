//! 任务编排错误类型
//!
//! 校验类错误（未知任务类型、参数非法、重名、命令格式错误、时间已过）为终止性错误：
//! 立即返回给调用方，绝不重试。任务执行失败在 InvocationBridge 处被转换为 TaskResult 文本。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Invalid task parameters: {0}")]
    InvalidParams(String),

    #[error("Task with name {0} already exists.")]
    DuplicateTaskName(String),

    /// LLM 输出无法解析，或缺少动作要求的字段
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Task execution failed: {0}")]
    TaskExecutionFailure(String),

    #[error("Requested time is in the past: {0}")]
    PastDeadline(String),

    /// 解释命令时出现的非预期错误，附带原始命令便于排查
    #[error("Failed to interpret command: {reason}\nCommand:\n{command}")]
    CommandInterpretationFailed { reason: String, command: String },

    #[error("Workflow instance {0} is already running")]
    WorkflowAlreadyRunning(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),
}

impl TaskError {
    /// 终止性错误：重试只会得到同样的结果
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskError::UnknownTaskType(_)
                | TaskError::InvalidParams(_)
                | TaskError::DuplicateTaskName(_)
                | TaskError::MalformedCommand(_)
                | TaskError::PastDeadline(_)
                | TaskError::CommandInterpretationFailed { .. }
                | TaskError::WorkflowAlreadyRunning(_)
        )
    }

    /// 命令解释阶段可识别的校验失败，原样透传
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TaskError::UnknownTaskType(_)
                | TaskError::InvalidParams(_)
                | TaskError::DuplicateTaskName(_)
                | TaskError::MalformedCommand(_)
                | TaskError::PastDeadline(_)
        )
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_terminal() {
        let errors = [
            TaskError::UnknownTaskType("x".into()),
            TaskError::InvalidParams("x".into()),
            TaskError::DuplicateTaskName("x".into()),
            TaskError::MalformedCommand("x".into()),
            TaskError::PastDeadline("x".into()),
        ];
        for err in errors {
            assert!(err.is_terminal(), "{err} should be terminal");
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(!TaskError::Llm("timeout".into()).is_terminal());
        assert!(!TaskError::Store("disk".into()).is_terminal());
    }

    #[test]
    fn test_interpretation_failure_carries_command() {
        let err = TaskError::CommandInterpretationFailed {
            reason: "boom".into(),
            command: "{\"action\":\"create\"}".into(),
        };
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("\"action\""));
        assert!(err.is_terminal());
        assert!(!err.is_validation());
    }
}
