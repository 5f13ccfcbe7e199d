//! Token accounting from stream-json agent transcripts.
//!
//! The agent prints one JSON event per line. The final `result` event carries
//! the session totals; earlier events are ignored for accounting.

use serde::Deserialize;
use serde_json::Value;

use crate::core::types::TokenUsage;

#[derive(Debug, Default, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

/// Parse usage from the last `result` event. Malformed lines are skipped.
pub fn parse_usage(transcript: &str) -> TokenUsage {
    let mut usage = TokenUsage::default();
    for line in transcript.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if event.get("type").and_then(Value::as_str) != Some("result") {
            continue;
        }
        let block: UsageBlock = event
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value(u).ok())
            .unwrap_or_default();
        usage = TokenUsage {
            input_tokens: block.input_tokens,
            output_tokens: block.output_tokens,
            cache_creation_tokens: block.cache_creation_input_tokens,
            cache_read_tokens: block.cache_read_input_tokens,
            cost_usd: event
                .get("total_cost_usd")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
        };
    }
    usage
}

/// Final `result` text of the transcript, if any.
pub fn result_text(transcript: &str) -> Option<String> {
    transcript
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .filter(|event| event.get("type").and_then(Value::as_str) == Some("result"))
        .filter_map(|event| event.get("result").and_then(Value::as_str).map(String::from))
        .last()
}
