//! 命令解释器
//!
//! 根据 LLM 命令与会话当前的活跃任务表调用 TaskControl，返回新的任务表（如有变更）与给用户的状态消息。
//! 任务表从不原地修改：变更在副本上完成，由会话在持久化成功后替换。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::command::{Action, TaskCommand};
use crate::core::TaskError;
use crate::tasks::{TaskControl, TaskOpts, NO_PROGRESS};

/// 会话中的一个活跃任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningTask {
    pub name: String,
    pub workflow_instance_id: String,
    pub task_type: String,
    pub params: Value,
}

/// 任务名 -> 活跃任务；按名称有序，列表渲染稳定
pub type ActiveTasks = BTreeMap<String, RunningTask>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    /// Some 表示任务表有变更
    pub new_active_tasks: Option<ActiveTasks>,
    pub task_message: Option<String>,
}

impl CommandOutput {
    fn message(text: String) -> Self {
        Self {
            new_active_tasks: None,
            task_message: Some(text),
        }
    }
}

fn not_active(name: &str) -> CommandOutput {
    CommandOutput::message(format!("No task with name '{}' is currently active.", name))
}

fn pretty(value: &impl Serialize) -> Result<String, TaskError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn required<'a, T>(field: &'a Option<T>, name: &str, action: Action) -> Result<&'a T, TaskError> {
    field.as_ref().ok_or_else(|| {
        TaskError::MalformedCommand(format!(
            "Missing required field '{}' for action '{}'",
            name, action
        ))
    })
}

/// 解释命令；校验类错误原样返回，其余错误包装为 CommandInterpretationFailed
pub async fn interpret(
    control: &dyn TaskControl,
    session_id: &str,
    active_tasks: &ActiveTasks,
    command: &TaskCommand,
) -> Result<CommandOutput, TaskError> {
    match apply(control, session_id, active_tasks, command).await {
        Ok(output) => Ok(output),
        Err(e) if e.is_validation() => Err(e),
        Err(e) => Err(TaskError::CommandInterpretationFailed {
            reason: e.to_string(),
            command: serde_json::to_string_pretty(command).unwrap_or_else(|_| format!("{:?}", command)),
        }),
    }
}

async fn apply(
    control: &dyn TaskControl,
    session_id: &str,
    active_tasks: &ActiveTasks,
    command: &TaskCommand,
) -> Result<CommandOutput, TaskError> {
    match command.action {
        Action::Create => {
            let name = required(&command.task_name, "task_name", Action::Create)?;
            let task_type = required(&command.task_type, "task_type", Action::Create)?;
            let params = required(&command.task_spec, "task_spec", Action::Create)?;

            if active_tasks.contains_key(name) {
                return Err(TaskError::DuplicateTaskName(name.clone()));
            }

            let instance_id = control
                .start_task(
                    session_id,
                    TaskOpts {
                        name: name.clone(),
                        task_type: task_type.clone(),
                        params: params.clone(),
                    },
                )
                .await?;
            tracing::info!("Session {} created task '{}' ({})", session_id, name, instance_id);

            let mut next = active_tasks.clone();
            next.insert(
                name.clone(),
                RunningTask {
                    name: name.clone(),
                    workflow_instance_id: instance_id,
                    task_type: task_type.clone(),
                    params: params.clone(),
                },
            );
            Ok(CommandOutput {
                new_active_tasks: Some(next),
                task_message: Some(format!(
                    "The task '{}' of type {} has been successfully created in the system: {}",
                    name,
                    task_type,
                    pretty(params)?
                )),
            })
        }

        Action::Cancel => {
            let name = required(&command.task_name, "task_name", Action::Cancel)?;
            let Some(task) = active_tasks.get(name) else {
                return Ok(not_active(name));
            };

            control
                .cancel_task(&task.task_type, &task.workflow_instance_id)
                .await?;

            let mut next = active_tasks.clone();
            next.remove(name);
            Ok(CommandOutput {
                new_active_tasks: Some(next),
                task_message: Some(format!("Removed task '{}'", name)),
            })
        }

        Action::Status => {
            let name = required(&command.task_name, "task_name", Action::Status)?;
            let Some(task) = active_tasks.get(name) else {
                return Ok(not_active(name));
            };

            let status = control
                .get_task_status(&task.task_type, &task.workflow_instance_id)
                .await?;
            let rendered = match status {
                Some(v) => pretty(&v)?,
                None => NO_PROGRESS.to_string(),
            };
            Ok(CommandOutput::message(format!("{}.status = {}", name, rendered)))
        }

        Action::List => {
            if active_tasks.is_empty() {
                return Ok(CommandOutput::message(
                    "There are currently no active tasks.".to_string(),
                ));
            }
            Ok(CommandOutput::message(format!("tasks = {}", pretty(active_tasks)?)))
        }

        Action::Other => Ok(CommandOutput::default()),
    }
}
