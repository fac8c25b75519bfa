//! Usage: The 502 error body shape and the bounded trail of attempt summaries behind it.

use serde::Serialize;

use crate::keys::preview;

const MAX_DETAILS: usize = 5;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Accumulates short, plaintext-free attempt summaries, keeping only the most
/// recent few for the final error body.
#[derive(Debug, Default)]
pub struct AttemptTrail {
    summaries: Vec<String>,
}

impl AttemptTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, url: &str, key: &str, summary: &str) {
        self.summaries.push(format!("{url} [{}]: {summary}", preview(key)));
    }

    pub fn last_few(&self) -> Vec<String> {
        self.summaries
            .iter()
            .rev()
            .take(MAX_DETAILS)
            .rev()
            .cloned()
            .collect()
    }
}

pub fn failover_exhausted(trail: &AttemptTrail) -> ErrorBody {
    ErrorBody {
        error: ErrorDetail {
            kind: "failover_exhausted".to_string(),
            message: "all candidate URLs and keys were exhausted".to_string(),
            details: trail.last_few(),
            suggestion: None,
        },
    }
}

pub fn probe_success_full_failed(trail: &AttemptTrail) -> ErrorBody {
    ErrorBody {
        error: ErrorDetail {
            kind: "probe_success_full_failed".to_string(),
            message: "a probe request succeeded but every full request failed".to_string(),
            details: trail.last_few(),
            suggestion: None,
        },
    }
}

pub fn content_error_after_probe(message: &str) -> ErrorBody {
    ErrorBody {
        error: ErrorDetail {
            kind: "content_error_after_probe".to_string(),
            message: message.to_string(),
            details: Vec::new(),
            suggestion: Some("the upstream is reachable; the request content was rejected".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_never_exceeds_max_details() {
        let mut trail = AttemptTrail::new();
        for i in 0..20 {
            trail.record("https://a.test", "sk-ant-secretkeyvalue", &format!("failure {i}"));
        }
        assert_eq!(trail.last_few().len(), MAX_DETAILS);
        assert!(trail.last_few()[0].contains("failure 15"));
    }

    #[test]
    fn trail_never_leaks_plaintext_key() {
        let mut trail = AttemptTrail::new();
        trail.record("https://a.test", "sk-ant-supersecretvalue", "timeout");
        assert!(!trail.last_few()[0].contains("supersecretvalue"));
    }
}
