//! taskbot 控制台
//!
//! 入口：初始化日志、加载配置、装配运行时，然后在终端里与单个会话对话。
//! 任务结束通知直接打印到终端。输入 quit 或 Ctrl+C 退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use taskbot::config::load_config;
use taskbot::core::{RuntimeBuilder, ShutdownManager, ShutdownReason};
use taskbot::notify::ChannelNotifier;
use tokio::io::{AsyncBufReadExt, BufReader};

const CONSOLE_SESSION: &str = "console";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskbot::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let (notifier, mut notifications) = ChannelNotifier::new();
    let runtime = RuntimeBuilder::new(config)
        .with_notifier(Arc::new(notifier))
        .build()
        .await
        .context("Failed to start runtime")?;

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();
    let token = shutdown.token();

    println!("taskbot ready. Try: remind me in 2 minutes to stretch. Type 'quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            Some((_, text)) = notifications.recv() => {
                println!("\n[notification] {}", text);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                }

                match runtime.hub.chat(CONSOLE_SESSION, line).await {
                    Ok(reply) => {
                        println!("bot> {}", reply.message);
                        if let Some(quote) = reply.quote {
                            println!("     {}", quote);
                        }
                    }
                    Err(e) => println!("error> {}", e),
                }
            }
        }
    }

    tracing::info!("Shutting down ({:?})", shutdown.reason());
    runtime.shutdown();
    Ok(())
}
