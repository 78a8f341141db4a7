//! 对话历史
//!
//! 会话历史只追加不修改；送入 LLM 时只取最近 N 轮（每轮 user + assistant，约 N*2 条消息）。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 追加一轮对话；bot 为 None 时只追加 user 条目
pub fn concat_history(history: &[Message], user: impl Into<String>, bot: Option<String>) -> Vec<Message> {
    let mut next = Vec::with_capacity(history.len() + 2);
    next.extend_from_slice(history);
    next.push(Message::user(user));
    if let Some(bot) = bot {
        next.push(Message::assistant(bot));
    }
    next
}

/// 最近 max_turns 轮（max_turns*2 条）
pub fn recent_turns(history: &[Message], max_turns: usize) -> &[Message] {
    let keep = max_turns.saturating_mul(2);
    if history.len() > keep {
        &history[history.len() - keep..]
    } else {
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_history_keeps_order() {
        let h = concat_history(&[], "hi", Some("hello".into()));
        let h = concat_history(&h, "The task with name 'r1' is finished.", None);
        assert_eq!(
            h,
            vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("The task with name 'r1' is finished."),
            ]
        );
    }

    #[test]
    fn test_recent_turns_window() {
        let mut h = Vec::new();
        for i in 0..5 {
            h = concat_history(&h, format!("u{}", i), Some(format!("b{}", i)));
        }
        let recent = recent_turns(&h, 2);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0], Message::user("u3"));
        assert_eq!(recent_turns(&h, 10).len(), 10);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
