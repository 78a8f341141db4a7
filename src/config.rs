//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKBOT__*` 覆盖（双下划线表示嵌套，如 `TASKBOT__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tasks: TasksSection,
    pub store: StoreSection,
    pub notify: NotifySection,
    pub inbound: InboundSection,
}

/// [app] 段：应用名、上下文轮数、已投递结果的去重窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 送入 LLM 的历史轮数
    pub max_context_turns: usize,
    /// 会话记住的已投递实例 ID 数量上限
    pub history_dedup_window: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: default_max_context_turns(),
            history_dedup_window: default_history_dedup_window(),
        }
    }
}

fn default_max_context_turns() -> usize {
    20
}

fn default_history_dedup_window() -> usize {
    256
}

/// [llm] 段：后端选择、采样温度、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：mock / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    /// 非终止性错误（网络、超时）的重试次数
    pub max_retries: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tasks] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    /// 航班价格探测间隔（秒）
    pub price_poll_interval_secs: u64,
    /// 任务结果投递给会话的最大尝试次数
    pub delivery_attempts: u32,
    /// 首次重投前的等待（毫秒），之后逐次翻倍
    pub delivery_backoff_ms: u64,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            price_poll_interval_secs: default_price_poll_interval_secs(),
            delivery_attempts: default_delivery_attempts(),
            delivery_backoff_ms: default_delivery_backoff_ms(),
        }
    }
}

fn default_price_poll_interval_secs() -> u64 {
    10
}

fn default_delivery_attempts() -> u32 {
    5
}

fn default_delivery_backoff_ms() -> u64 {
    200
}

impl TasksSection {
    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_interval_secs)
    }
}

/// [store] 段：memory 或 sqlite（需 async-sqlite feature）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: String,
    pub path: Option<PathBuf>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: None,
        }
    }
}

/// [notify] 段：设置 webhook_url 时通知 POST 到该地址，否则写日志
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NotifySection {
    pub webhook_url: Option<String>,
}

/// [inbound] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InboundSection {
    /// 入站事件 ID 的保留时长（秒）
    pub dedup_retention_secs: u64,
}

impl Default for InboundSection {
    fn default() -> Self {
        Self {
            dedup_retention_secs: default_dedup_retention_secs(),
        }
    }
}

fn default_dedup_retention_secs() -> u64 {
    24 * 60 * 60
}

/// 从 config 目录加载配置，环境变量 TASKBOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKBOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKBOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_without_any_source() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_context_turns, 20);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert_eq!(cfg.tasks.price_poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.tasks.delivery_attempts, 5);
        assert_eq!(cfg.tasks.delivery_backoff_ms, 200);
        assert_eq!(cfg.store.backend, "memory");
        assert_eq!(cfg.inbound.dedup_retention_secs, 86_400);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"openai\"\nmax_retries = 1\n\n[tasks]\nprice_poll_interval_secs = 3\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.max_retries, 1);
        assert_eq!(cfg.tasks.price_poll_interval_secs, 3);
        assert_eq!(cfg.app.history_dedup_window, 256);
    }
}
