use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bounded-concurrency JSON-RPC 2.0 client over HTTPS.
///
/// At most `max_concurrency` requests are in flight at once, enforced by a
/// counting semaphore around each POST. Cheap to clone: the connection pool,
/// id counter and semaphore are shared.
#[derive(Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
    inflight: Arc<Semaphore>,
}

impl RpcClient {
    pub fn connect(url: impl Into<String>, max_concurrency: usize) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            url: url.into(),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
            inflight: Arc::new(Semaphore::new(max_concurrency.max(1))),
        })
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let _permit = self
            .inflight
            .acquire()
            .await
            .context("rpc semaphore closed")?;

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} POST {}", self.url))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .with_context(|| format!("{method} read body"))?;

        if status != StatusCode::OK {
            anyhow::bail!("{method} http status={} body={}", status.as_u16(), text);
        }

        let v: Value = serde_json::from_str(&text).with_context(|| format!("{method} parse json"))?;
        if let Some(err) = v.get("error") {
            anyhow::bail!("{method} rpc error: {err}");
        }
        let Some(result) = v.get("result") else {
            anyhow::bail!("{method} missing result field");
        };
        Ok(result.clone())
    }

    pub async fn block_number(&self) -> Result<u64> {
        let v = self.call("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity_u64(v).context("parse eth_blockNumber")
    }

    pub async fn get_block_by_number(&self, block_number: u64, full_tx: bool) -> Result<Option<Value>> {
        let v = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([format_quantity(block_number), full_tx]),
            )
            .await?;
        if v.is_null() { Ok(None) } else { Ok(Some(v)) }
    }

    pub async fn get_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Value>> {
        let filter = serde_json::json!({
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
        });
        let v = self.call("eth_getLogs", serde_json::json!([filter])).await?;
        serde_json::from_value(v).context("parse eth_getLogs result as an array of logs")
    }
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn parse_quantity_u64(v: Value) -> Result<u64> {
    match v {
        Value::String(s) => parse_quantity_u64_str(&s),
        Value::Number(n) => n.as_u64().context("quantity number not representable as u64"),
        other => anyhow::bail!("unexpected quantity json type: {other}"),
    }
}

fn parse_quantity_u64_str(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let Some(hex) = trimmed.strip_prefix("0x") else {
        return trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid decimal u64: {trimmed}"));
    };
    if hex.is_empty() {
        anyhow::bail!("invalid hex quantity: {trimmed}");
    }
    u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex quantity: {trimmed}"))
}

/// Arbitrary-precision hex quantity, preserved as a decimal string (256-bit
/// token values and gas prices must never be truncated to u64).
pub fn hex_to_decimal_string(value: Option<&str>) -> Result<Option<String>> {
    let Some(value) = value else { return Ok(None) };
    let trimmed = value.trim().strip_prefix("0x").unwrap_or(value.trim());
    let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
    let n = alloy::primitives::U256::from_str_radix(trimmed, 16)
        .with_context(|| format!("invalid 256-bit hex quantity: {value}"))?;
    Ok(Some(n.to_string()))
}

/// Heuristic classification of provider error messages, used by the driving
/// loops (worker/tailer) to decide retry/backoff policy. The RPC layer itself
/// never retries; this is caller policy layered on top.
pub fn looks_like_transient(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("deadline")
        || msg.contains("too many requests")
        || msg.contains("rate limit")
        || msg.contains("429")
        || msg.contains("bad gateway")
        || msg.contains("service unavailable")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("connection refused")
        || msg.contains("broken pipe")
}

pub fn looks_like_range_too_large(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("range too large")
        || msg.contains("block range")
        || msg.contains("too many results")
        || msg.contains("response size exceeded")
        || msg.contains("payload too large")
        || msg.contains("query returned more than")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_roundtrip() {
        assert_eq!(format_quantity(255), "0xff");
        assert_eq!(parse_quantity_u64(Value::String("0xff".into())).unwrap(), 255);
        assert_eq!(parse_quantity_u64(Value::String("0x0".into())).unwrap(), 0);
    }

    #[test]
    fn decimal_string_preserves_256_bit_values() {
        let max = "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
        let got = hex_to_decimal_string(Some(max)).unwrap().unwrap();
        assert_eq!(got, alloy::primitives::U256::MAX.to_string());
    }

    #[test]
    fn decimal_string_none_passthrough() {
        assert_eq!(hex_to_decimal_string(None).unwrap(), None);
    }

    #[test]
    fn transient_classification() {
        assert!(looks_like_transient(&anyhow::anyhow!("rpc error: 429 too many requests")));
        assert!(!looks_like_transient(&anyhow::anyhow!("decode error")));
    }

    #[test]
    fn range_too_large_classification() {
        assert!(looks_like_range_too_large(&anyhow::anyhow!(
            "eth_getLogs http status=400 body=query returned more than 10000 results"
        )));
    }
}
