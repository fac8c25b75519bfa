//! Usage: Per-request retry/probe bookkeeping, scoped to the lifetime of one inbound request.

use serde_json::{json, Value};

const PROBE_MAX_TOKENS: u64 = 1;
const FULL_ATTEMPTS_BEFORE_PROBE: u32 = 2;

#[derive(Debug, Clone)]
pub struct RetryContext {
    original_body: Vec<u8>,
    probe_body: Vec<u8>,
    pub full_attempts: u32,
    pub probe_attempts: u32,
    pub probe_succeeded_but_full_failed: bool,
    pub last_success: Option<(String, String)>,
}

impl RetryContext {
    pub fn new(original_body: Vec<u8>, default_model: &str) -> Self {
        let model = extract_model(&original_body).unwrap_or_else(|| default_model.to_string());
        let probe_body = serde_json::to_vec(&json!({
            "model": model,
            "max_tokens": PROBE_MAX_TOKENS,
            "messages": [{ "role": "user", "content": "ping" }]
        }))
        .unwrap_or_default();

        Self {
            original_body,
            probe_body,
            full_attempts: 0,
            probe_attempts: 0,
            probe_succeeded_but_full_failed: false,
            last_success: None,
        }
    }

    pub fn should_use_probe(&self) -> bool {
        self.full_attempts >= FULL_ATTEMPTS_BEFORE_PROBE
    }

    pub fn current_body(&self) -> &[u8] {
        if self.should_use_probe() {
            &self.probe_body
        } else {
            &self.original_body
        }
    }

    pub fn original_body(&self) -> &[u8] {
        &self.original_body
    }

    pub fn record_attempt(&mut self, is_probe: bool, success: bool, url: Option<&str>, key: Option<&str>) {
        if is_probe {
            self.probe_attempts += 1;
        } else {
            self.full_attempts += 1;
        }
        if success {
            if let (Some(url), Some(key)) = (url, key) {
                self.last_success = Some((url.to_string(), key.to_string()));
            }
        }
    }

    /// Undo the most recent full-attempt increment without letting the counter go
    /// negative, used when an auth-error retry must not consume the full-attempt
    /// budget.
    pub fn uncount_full_attempt(&mut self) {
        self.full_attempts = self.full_attempts.saturating_sub(1);
    }
}

fn extract_model(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("model")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_kicks_in_after_two_full_attempts() {
        let mut ctx = RetryContext::new(br#"{"model":"claude-x"}"#.to_vec(), "default-model");
        assert!(!ctx.should_use_probe());
        ctx.record_attempt(false, false, None, None);
        assert!(!ctx.should_use_probe());
        ctx.record_attempt(false, false, None, None);
        assert!(ctx.should_use_probe());
    }

    #[test]
    fn probe_body_uses_model_from_original() {
        let ctx = RetryContext::new(br#"{"model":"claude-x","messages":[]}"#.to_vec(), "default-model");
        let probe: Value = serde_json::from_slice(&ctx.probe_body).unwrap();
        assert_eq!(probe["model"], "claude-x");
        assert_eq!(probe["max_tokens"], 1);
        assert_eq!(probe["messages"][0]["content"], "ping");
    }

    #[test]
    fn probe_body_falls_back_to_default_model() {
        let ctx = RetryContext::new(br#"{"no_model_here":true}"#.to_vec(), "default-model");
        let probe: Value = serde_json::from_slice(&ctx.probe_body).unwrap();
        assert_eq!(probe["model"], "default-model");
    }

    #[test]
    fn current_body_switches_on_probe_threshold() {
        let mut ctx = RetryContext::new(br#"{"model":"m"}"#.to_vec(), "default-model");
        assert_eq!(ctx.current_body(), ctx.original_body());
        ctx.record_attempt(false, false, None, None);
        ctx.record_attempt(false, false, None, None);
        assert_ne!(ctx.current_body(), ctx.original_body());
    }

    #[test]
    fn uncount_full_attempt_never_goes_negative() {
        let mut ctx = RetryContext::new(br#"{"model":"m"}"#.to_vec(), "default-model");
        ctx.uncount_full_attempt();
        assert_eq!(ctx.full_attempts, 0);
    }

    #[test]
    fn record_attempt_remembers_last_success() {
        let mut ctx = RetryContext::new(br#"{"model":"m"}"#.to_vec(), "default-model");
        ctx.record_attempt(false, true, Some("https://a.test"), Some("sk-a"));
        assert_eq!(
            ctx.last_success,
            Some(("https://a.test".to_string(), "sk-a".to_string()))
        );
    }
}
