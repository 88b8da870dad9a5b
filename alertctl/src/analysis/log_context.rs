//! Bounded digestion of uploaded log payloads.
//!
//! Clients may attach arbitrary JSON (exported SIEM events, auth logs) to an
//! alert. Before anything reaches the generation prompt it is reduced to:
//!
//! - **indicators**: a short summary of the entities involved (IPs and user
//!   names pulled from an `events` array), also echoed back to the caller as
//!   the `context` field of the result;
//! - **digest**: a depth-, node- and length-bounded rendering of the raw
//!   payload. Anything past the configured limits is elided with `…` -
//!   payloads are never forwarded unbounded.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::LogPayloadConfig;

/// What the pipeline knows about the optional log payload.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    /// Entity summary, empty when no recognizable indicators were found
    pub indicators: String,
    /// Bounded rendering of the payload for prompt inclusion
    pub digest: Option<String>,
}

impl LogContext {
    pub fn build(payload: Option<&Value>, config: &LogPayloadConfig) -> Self {
        let Some(payload) = payload else {
            return Self::default();
        };

        Self {
            indicators: extract_indicators(payload),
            digest: Some(render_bounded(payload, config)),
        }
    }

    pub fn has_indicators(&self) -> bool {
        !self.indicators.is_empty()
    }
}

/// Pull IPs/users from an `events` array for extra context.
///
/// The shape follows what the dashboard uploads: `{"events": [{"ip": ...,
/// "user": ...}, ...]}`. Unknown shapes simply yield no indicators.
fn extract_indicators(payload: &Value) -> String {
    let Some(events) = payload.get("events").and_then(Value::as_array) else {
        return String::new();
    };

    let mut ips: BTreeSet<&str> = BTreeSet::new();
    let mut users: BTreeSet<&str> = BTreeSet::new();
    for event in events {
        if let Some(ip) = event.get("ip").and_then(Value::as_str) {
            ips.insert(ip);
        }
        if let Some(user) = event.get("user").and_then(Value::as_str) {
            users.insert(user);
        }
    }

    let mut bits = Vec::new();
    if !ips.is_empty() {
        bits.push(format!("IPs involved: {}", ips.into_iter().collect::<Vec<_>>().join(", ")));
    }
    if !users.is_empty() {
        bits.push(format!("Users involved: {}", users.into_iter().collect::<Vec<_>>().join(", ")));
    }
    bits.join(" | ")
}

/// Render a JSON value with hard bounds on depth, node count, string length
/// and total output size.
fn render_bounded(value: &Value, config: &LogPayloadConfig) -> String {
    let mut out = String::new();
    let mut nodes_left = config.max_nodes;
    render_value(value, config, 0, &mut nodes_left, &mut out);
    if out.chars().count() > config.max_chars {
        let mut clipped: String = out.chars().take(config.max_chars).collect();
        clipped.push('…');
        return clipped;
    }
    out
}

fn render_value(value: &Value, config: &LogPayloadConfig, depth: usize, nodes_left: &mut usize, out: &mut String) {
    if *nodes_left == 0 {
        out.push('…');
        return;
    }
    *nodes_left -= 1;

    if depth >= config.max_depth && (value.is_object() || value.is_array()) {
        out.push('…');
        return;
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push('"');
            if s.chars().count() > config.max_string_chars {
                out.extend(s.chars().take(config.max_string_chars));
                out.push('…');
            } else {
                out.push_str(s);
            }
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if *nodes_left == 0 {
                    out.push('…');
                    break;
                }
                render_value(item, config, depth + 1, nodes_left, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if *nodes_left == 0 {
                    out.push('…');
                    break;
                }
                out.push_str(key);
                out.push_str(": ");
                render_value(item, config, depth + 1, nodes_left, out);
            }
            out.push('}');
        }
    }
}
