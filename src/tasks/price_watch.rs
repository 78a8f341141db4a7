//! 航班价格监控
//!
//! 按固定间隔探测往返航线报价，价格不高于阈值时完成；每次探测后先持久化最新报价与探测次数，
//! 再进入等待，恢复的实例从上次的次数继续。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workflow::{required_str, RunOutcome, TaskWorkflow};
use crate::core::TaskError;
use crate::durable::WorkflowContext;

pub const FLIGHT_PRICE: &str = "flight_price";

/// 默认探测间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const LAST_QUOTE_KEY: &str = "last_quote";
const ATTEMPT_KEY: &str = "attempt";

/// 往返航线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub start: String,
    pub destination: String,
    pub outbound_date: String,
    pub return_date: String,
    pub travel_class: String,
}

/// 报价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub currency: String,
    pub link: String,
    pub retrieved: String,
}

impl std::fmt::Display for Quote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} {} ({}, retrieved {})",
            self.price, self.currency, self.link, self.retrieved
        )
    }
}

/// 规范化后的监控参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceWatchParams {
    pub name: String,
    pub trip: RoundTrip,
    pub price_threshold_usd: f64,
}

/// 报价来源
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn best_quote(&self, trip: &RoundTrip, price_threshold: f64) -> Result<Quote, String>;
}

/// 模拟报价：约五次中有一次低于阈值（0–10%），其余高出 1%–201%
#[derive(Debug, Default)]
pub struct SimulatedQuoteProvider;

#[async_trait]
impl QuoteProvider for SimulatedQuoteProvider {
    async fn best_quote(&self, trip: &RoundTrip, price_threshold: f64) -> Result<Quote, String> {
        let price = if rand::random::<f64>() < 0.2 {
            price_threshold * (1.0 - rand::random::<f64>() / 10.0)
        } else {
            price_threshold * (1.01 + 2.0 * rand::random::<f64>())
        };

        Ok(Quote {
            price: (price * 100.0).floor() / 100.0,
            currency: "USD".to_string(),
            link: format!(
                "https://www.google.com/travel/flights?q={}-{}",
                trip.start, trip.destination
            ),
            retrieved: chrono::Utc::now().format("%a %b %d %Y").to_string(),
        })
    }
}

pub struct FlightPriceWatch {
    quotes: Arc<dyn QuoteProvider>,
    poll_interval: Duration,
}

impl FlightPriceWatch {
    pub fn new(quotes: Arc<dyn QuoteProvider>) -> Self {
        Self {
            quotes,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

fn parse_threshold(raw: &Value) -> Result<f64, TaskError> {
    let value = match raw.get("price_threshold") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_start_matches('$').parse::<f64>().ok(),
        Some(_) => None,
        None => {
            return Err(TaskError::InvalidParams(
                "missing required field 'price_threshold'".to_string(),
            ))
        }
    };

    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(TaskError::InvalidParams(
            "field 'price_threshold' must be a positive number".to_string(),
        )),
    }
}

#[async_trait]
impl TaskWorkflow for FlightPriceWatch {
    fn type_name(&self) -> &str {
        FLIGHT_PRICE
    }

    fn parse_params(&self, task_name: &str, raw: &Value) -> Result<Value, TaskError> {
        let trip = RoundTrip {
            start: required_str(raw, "start_airport")?.to_string(),
            destination: required_str(raw, "destination_airport")?.to_string(),
            outbound_date: required_str(raw, "outbound_date")?.to_string(),
            return_date: required_str(raw, "return_date")?.to_string(),
            travel_class: required_str(raw, "travel_class")?.to_string(),
        };
        let params = PriceWatchParams {
            name: task_name.to_string(),
            trip,
            price_threshold_usd: parse_threshold(raw)?,
        };
        Ok(serde_json::to_value(params)?)
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> Result<RunOutcome, TaskError> {
        let params: PriceWatchParams = serde_json::from_value(params)
            .map_err(|e| TaskError::InvalidParams(e.to_string()))?;
        let mut attempt: u64 = ctx.state().get(ATTEMPT_KEY).await?.unwrap_or(0);

        loop {
            if ctx.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            attempt += 1;
            tracing::debug!("Probing prices #{} for {}", attempt, params.name);
            let quote = self
                .quotes
                .best_quote(&params.trip, params.price_threshold_usd)
                .await
                .map_err(TaskError::TaskExecutionFailure)?;

            if quote.price <= params.price_threshold_usd {
                return Ok(RunOutcome::Completed(format!(
                    "Found an offer matching the price for {}: {}",
                    params.name, quote
                )));
            }

            ctx.state().set(LAST_QUOTE_KEY, &quote).await?;
            ctx.state().set(ATTEMPT_KEY, &attempt).await?;

            if ctx.sleep_or_cancel(self.poll_interval).await {
                return Ok(RunOutcome::Cancelled);
            }
        }
    }

    async fn status(&self, ctx: &WorkflowContext) -> Result<Option<Value>, TaskError> {
        ctx.state().get(LAST_QUOTE_KEY).await
    }
}
