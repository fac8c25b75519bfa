//! Usage: Pure classification of one upstream attempt into the next action to take.

use serde_json::Value;

use crate::challenge;

pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub error_type: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum UpstreamOutcome<'a> {
    /// Connection/DNS/reset/timeout before any response headers arrived.
    Transport,
    Response { status: u16, body: &'a [u8] },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailoverAction {
    ReturnSuccess,
    Return4xxAsIs { status: u16, error: Option<UpstreamError> },
    RetrySame,
    RefreshCookieAndRetrySame { cookie_token: String },
    NextKey,
    NextUrl,
    OneShotNonessentialRetry,
}

const AUTH_ERROR_TYPES: &[&str] = &["authentication_error", "invalid_api_key", "permission_error"];
const OVERLOAD_MARKERS: &[&str] = &["负载", "overload"];

/// Classify a single attempt. `attempt` is 1-based. Challenge detection is checked
/// ahead of the plain "status < 400 is success" rule: a WAF challenge page is
/// typically served with a 200 status, so success cannot be decided on status alone.
pub fn classify(
    attempt: u32,
    outcome: UpstreamOutcome<'_>,
    nonessential_disabled: bool,
    is_probe: bool,
) -> FailoverAction {
    let (status, body) = match outcome {
        UpstreamOutcome::Transport => {
            return if attempt < MAX_ATTEMPTS {
                FailoverAction::RetrySame
            } else {
                FailoverAction::NextKey
            };
        }
        UpstreamOutcome::Response { status, body } => (status, body),
    };

    if let Some(text) = std::str::from_utf8(body).ok().filter(|s| s.contains("var arg1=")) {
        return match challenge::solve(text) {
            Some(token) if attempt < MAX_ATTEMPTS => {
                FailoverAction::RefreshCookieAndRetrySame { cookie_token: token }
            }
            _ if attempt < MAX_ATTEMPTS => FailoverAction::RetrySame,
            _ => FailoverAction::NextUrl,
        };
    }

    if status < 400 {
        return FailoverAction::ReturnSuccess;
    }

    let error = parse_error(body);

    if status >= 500 {
        if let Some(msg) = error.as_ref().and_then(|e| e.message.as_deref()) {
            let lower = msg.to_lowercase();
            if OVERLOAD_MARKERS.iter().any(|m| lower.contains(&m.to_lowercase())) {
                return FailoverAction::NextUrl;
            }
        }

        if is_auth_error(&error) {
            return auth_action(nonessential_disabled, is_probe);
        }

        return if attempt < MAX_ATTEMPTS {
            FailoverAction::RetrySame
        } else {
            FailoverAction::NextUrl
        };
    }

    if (status == 401 || status == 403) && is_auth_error(&error) {
        return auth_action(nonessential_disabled, is_probe);
    }

    FailoverAction::Return4xxAsIs { status, error }
}

fn auth_action(nonessential_disabled: bool, is_probe: bool) -> FailoverAction {
    if !nonessential_disabled && !is_probe {
        FailoverAction::OneShotNonessentialRetry
    } else {
        FailoverAction::NextKey
    }
}

fn is_auth_error(error: &Option<UpstreamError>) -> bool {
    error
        .as_ref()
        .and_then(|e| e.error_type.as_deref())
        .map(|t| AUTH_ERROR_TYPES.contains(&t))
        .unwrap_or(false)
}

/// Content errors that, after a probe already succeeded, indicate the caller's
/// content is the problem rather than the upstream.
pub const CONTENT_ERROR_TYPES: &[&str] = &["invalid_request_error", "content_policy_violation", "request_too_large"];

pub fn is_content_error(error: &Option<UpstreamError>) -> bool {
    error
        .as_ref()
        .and_then(|e| e.error_type.as_deref())
        .map(|t| CONTENT_ERROR_TYPES.contains(&t))
        .unwrap_or(false)
}

fn parse_error(body: &[u8]) -> Option<UpstreamError> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let error = value.get("error")?;
    Some(UpstreamError {
        error_type: error.get("type").and_then(Value::as_str).map(str::to_string),
        message: error.get("message").and_then(Value::as_str).map(str::to_string),
    })
}
