//! Usage: System-prompt rewrite for the `v1/messages` endpoint.

use serde_json::{json, Value};

pub const KEYWORD: &str = "Claude Code";

#[derive(Debug, Clone)]
pub struct RewritePolicy {
    pub replacement: Option<String>,
    pub insert_if_not_exist: bool,
}

impl RewritePolicy {
    pub fn is_active(&self) -> bool {
        self.replacement.is_some()
    }
}

pub fn path_matches(path: &str) -> bool {
    path.trim_start_matches('/').trim_end_matches('/') == "v1/messages"
}

/// Apply the rewrite. Returns `body` unchanged (same bytes) whenever the policy is
/// inactive or the body doesn't have the expected shape.
pub fn rewrite(body: &[u8], policy: &RewritePolicy) -> Vec<u8> {
    let Some(replacement) = &policy.replacement else {
        return body.to_vec();
    };

    let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
        return body.to_vec();
    };

    let Some(system) = value.get_mut("system").and_then(Value::as_array_mut) else {
        return body.to_vec();
    };
    if system.is_empty() {
        return body.to_vec();
    }
    if !system[0].is_object() {
        return body.to_vec();
    }
    if system[0].get("text").is_none() {
        return body.to_vec();
    }

    if !policy.insert_if_not_exist {
        system[0]["text"] = json!(replacement);
    } else if contains_keyword(&system[0]) || already_rewritten(&system[0], replacement) {
        system[0]["text"] = json!(replacement);
    } else {
        system.insert(
            0,
            json!({
                "type": "text",
                "text": replacement,
                "cache_control": { "type": "ephemeral" }
            }),
        );
    }

    serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
}

fn contains_keyword(entry: &Value) -> bool {
    entry
        .get("text")
        .and_then(Value::as_str)
        .map(|t| t.to_lowercase().contains(&KEYWORD.to_lowercase()))
        .unwrap_or(false)
}

/// True if the leading entry's text already equals the replacement, i.e. a
/// previous rewrite already ran. Kept separate from `contains_keyword` since
/// an arbitrary replacement need not contain the keyword itself.
fn already_rewritten(entry: &Value, replacement: &str) -> bool {
    entry.get("text").and_then(Value::as_str) == Some(replacement)
}
