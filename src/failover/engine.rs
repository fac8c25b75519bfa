//! Usage: Orchestrates the failover loop — URL/key iteration, retries, streaming.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::header::HeaderMap as ReqwestHeaderMap;
use tokio::sync::mpsc;

use crate::body_rewrite;
use crate::cookies;
use crate::failover::classify::{self, FailoverAction, UpstreamOutcome};
use crate::failover::errors::{self, AttemptTrail};
use crate::failover::headers as hdr;
use crate::keys::key_id;
use crate::retry_context::RetryContext;
use crate::state::AppState;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const SNIFF_LIMIT: usize = 16 * 1024;
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

struct Sniffed {
    status: u16,
    headers: ReqwestHeaderMap,
    prefix: Vec<u8>,
    exhausted: bool,
    response: Option<reqwest::Response>,
}

/// Resolve the cookie header to send for `url`: the challenge-host jar (refreshed
/// through `CookieCache::ensure`) if the host is known to need one, falling back to
/// any token stashed directly via `store_token` for hosts `ensure` otherwise skips
/// entirely (response-driven challenge solving on non-challenge-marked hosts).
async fn cookie_header_for(state: &AppState, url: &str, force: bool) -> Option<String> {
    state
        .cookies
        .ensure(&state.client, url, force)
        .await
        .or_else(|| state.cookies.stored(url))
}

async fn send_and_sniff(client: &reqwest::Client, req: reqwest::Request) -> Result<Sniffed, reqwest::Error> {
    let mut resp = client.execute(req).await?;
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();

    let mut prefix = Vec::with_capacity(1024);
    let mut exhausted = false;
    while prefix.len() < SNIFF_LIMIT {
        match resp.chunk().await? {
            Some(chunk) => prefix.extend_from_slice(&chunk),
            None => {
                exhausted = true;
                break;
            }
        }
    }

    Ok(Sniffed {
        status,
        headers,
        prefix,
        exhausted,
        response: Some(resp),
    })
}

fn build_request(
    client: &reqwest::Client,
    method: &Method,
    url: &str,
    path_and_query: &str,
    base_headers: &ReqwestHeaderMap,
    api_key: &str,
    cookie_header: Option<&str>,
    body: Vec<u8>,
) -> reqwest::Request {
    let full_url = format!("{}/{}", url.trim_end_matches('/'), path_and_query.trim_start_matches('/'));
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::POST);

    let mut builder = client.request(reqwest_method, &full_url).headers(base_headers.clone());

    if let Ok(host) = reqwest::header::HeaderValue::from_str(
        reqwest::Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)).unwrap_or_default().as_str(),
    ) {
        builder = builder.header(reqwest::header::HOST, host);
    }
    builder = builder.header("x-api-key", api_key);
    if let Some(cookie) = cookie_header {
        builder = builder.header(reqwest::header::COOKIE, cookie);
    }

    builder.body(body).build().expect("well-formed outbound request")
}

pub async fn handle_request(
    state: &AppState,
    method: Method,
    path_and_query: &str,
    inbound_headers: ReqwestHeaderMap,
    body: Bytes,
    client_addr: &str,
) -> Response {
    let path = path_and_query.split('?').next().unwrap_or(path_and_query);
    let rewritten = if body_rewrite::path_matches(path) {
        body_rewrite::rewrite(&body, &state.config.rewrite_policy)
    } else {
        body.to_vec()
    };

    let base_headers = hdr::build_base_headers(&inbound_headers, client_addr, &state.config.headers_overlay);

    let urls = available_urls(state);
    let keys = state.usage.sorted_available(&state.config.api_keys, &state.cooldowns);

    if urls.is_empty() || keys.is_empty() {
        return error_response(StatusCode::BAD_GATEWAY, &errors::failover_exhausted(&AttemptTrail::new()));
    }

    let mut ctx = RetryContext::new(rewritten, DEFAULT_MODEL);
    let mut trail = AttemptTrail::new();

    'urls: for url in &urls {
        if cookies::may_require_challenge(url) {
            state.cookies.ensure(&state.client, url, false).await;
        }

        'keys: for key in &keys {
            state.usage.increment(key);
            let is_probe = ctx.should_use_probe();
            let body_for_attempt = ctx.current_body().to_vec();

            let mut attempt: u32 = 1;
            let mut passes = 0u32;
            while passes <= classify::MAX_ATTEMPTS {
                passes += 1;

                let cookie_header = cookie_header_for(state, url, attempt > 1).await;
                let req = build_request(
                    &state.client,
                    &method,
                    url,
                    path_and_query,
                    &base_headers,
                    key,
                    cookie_header.as_deref(),
                    body_for_attempt.clone(),
                );

                let sniffed = match send_and_sniff(&state.client, req).await {
                    Ok(s) => s,
                    Err(_) => {
                        let action = classify::classify(attempt, UpstreamOutcome::Transport, state.nonessential.is_disabled(), is_probe);
                        trail.record(url, key, "transport error");
                        match action {
                            FailoverAction::RetrySame => {
                                attempt += 1;
                                tokio::time::sleep(RETRY_BACKOFF).await;
                                continue;
                            }
                            FailoverAction::NextKey => {
                                ctx.record_attempt(is_probe, false, None, None);
                                continue 'keys;
                            }
                            _ => unreachable!("transport classification only yields RetrySame/NextKey"),
                        }
                    }
                };

                let action = classify::classify(
                    attempt,
                    UpstreamOutcome::Response {
                        status: sniffed.status,
                        body: &sniffed.prefix,
                    },
                    state.nonessential.is_disabled(),
                    is_probe,
                );

                match action {
                    FailoverAction::ReturnSuccess => {
                        if is_probe {
                            ctx.record_attempt(true, true, Some(url), Some(key));
                            let cookie_header = cookie_header_for(state, url, false).await;
                            let full_req = build_request(
                                &state.client,
                                &method,
                                url,
                                path_and_query,
                                &base_headers,
                                key,
                                cookie_header.as_deref(),
                                ctx.original_body().to_vec(),
                            );
                            let full_sniffed = match send_and_sniff(&state.client, full_req).await {
                                Ok(s) => s,
                                Err(_) => {
                                    ctx.probe_succeeded_but_full_failed = true;
                                    ctx.record_attempt(false, false, None, None);
                                    trail.record(url, key, "probe ok, full request transport error");
                                    continue 'keys;
                                }
                            };
                            let full_action = classify::classify(
                                1,
                                UpstreamOutcome::Response {
                                    status: full_sniffed.status,
                                    body: &full_sniffed.prefix,
                                },
                                state.nonessential.is_disabled(),
                                false,
                            );
                            match full_action {
                                FailoverAction::ReturnSuccess => {
                                    ctx.record_attempt(false, true, Some(url), Some(key));
                                    state.pending.confirm(url).into_iter().for_each(|kid| {
                                        state.cooldowns.set_key_cooldown(&kid);
                                    });
                                    return stream_success(full_sniffed);
                                }
                                FailoverAction::Return4xxAsIs { status, error } if classify::is_content_error(&error) => {
                                    let msg = error
                                        .and_then(|e| e.message)
                                        .unwrap_or_else(|| "request content was rejected".to_string());
                                    return error_response(
                                        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
                                        &errors::content_error_after_probe(&msg),
                                    );
                                }
                                _ => {
                                    ctx.probe_succeeded_but_full_failed = true;
                                    ctx.record_attempt(false, false, None, None);
                                    trail.record(url, key, "probe succeeded, full request failed");
                                    continue 'keys;
                                }
                            }
                        } else {
                            ctx.record_attempt(false, true, Some(url), Some(key));
                            state.pending.confirm(url).into_iter().for_each(|kid| {
                                state.cooldowns.set_key_cooldown(&kid);
                            });
                            return stream_success(sniffed);
                        }
                    }
                    FailoverAction::Return4xxAsIs { status, .. } => {
                        ctx.record_attempt(is_probe, false, None, None);
                        trail.record(url, key, &format!("upstream 4xx: {status}"));
                        return passthrough_response(status, sniffed);
                    }
                    FailoverAction::RetrySame => {
                        trail.record(url, key, "retrying same key");
                        attempt += 1;
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                    FailoverAction::RefreshCookieAndRetrySame { cookie_token } => {
                        state.cookies.store_token(url, "acw_sc__v2", &cookie_token);
                        trail.record(url, key, "waf challenge solved, retrying");
                        attempt += 1;
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                    FailoverAction::NextKey => {
                        state.pending.add(url, key_id(key));
                        ctx.record_attempt(is_probe, false, None, None);
                        trail.record(url, key, "auth error, trying next key");
                        continue 'keys;
                    }
                    FailoverAction::NextUrl => {
                        state.pending.clear(url);
                        ctx.record_attempt(is_probe, false, None, None);
                        trail.record(url, key, "url-level failure, trying next url");
                        continue 'urls;
                    }
                    FailoverAction::OneShotNonessentialRetry => {
                        if state.nonessential.set_disabled() {
                            state.nonessential.export_to_env();
                        }
                        ctx.uncount_full_attempt();
                        trail.record(url, key, "first auth error, one-shot nonessential retry");
                        tokio::time::sleep(RETRY_BACKOFF).await;
                        // Does not advance `attempt`: this bonus retry is outside the
                        // normal per-key attempt budget.
                    }
                }
            }
        }
    }

    let body = if ctx.probe_succeeded_but_full_failed {
        errors::probe_success_full_failed(&trail)
    } else {
        errors::failover_exhausted(&trail)
    };
    error_response(StatusCode::BAD_GATEWAY, &body)
}

fn available_urls(state: &AppState) -> Vec<String> {
    let candidates = &state.config.candidate_urls;
    let available = state.cooldowns.available_urls(candidates);
    if !available.is_empty() {
        return available;
    }
    state
        .cooldowns
        .earliest_expiring_url(candidates)
        .into_iter()
        .collect()
}

fn error_response(status: StatusCode, body: &errors::ErrorBody) -> Response {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    (status, [("content-type", "application/json")], bytes).into_response()
}

fn passthrough_response(status: u16, sniffed: Sniffed) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = hdr::strip_response_headers(&sniffed.headers);
    let mut response = Response::builder().status(status);
    for (name, value) in headers.iter() {
        response = response.header(name, value);
    }
    response.body(Body::from(sniffed.prefix)).unwrap_or_else(|_| {
        (StatusCode::BAD_GATEWAY, "upstream response could not be forwarded").into_response()
    })
}

/// Stream the already-sniffed prefix plus the remainder of the upstream body to the
/// client. A background task relays chunks and closes the upstream response on
/// completion or client disconnect.
fn stream_success(sniffed: Sniffed) -> Response {
    let status = StatusCode::from_u16(sniffed.status).unwrap_or(StatusCode::OK);
    let headers = hdr::strip_response_headers(&sniffed.headers);

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);

    let prefix = Bytes::from(sniffed.prefix);
    let exhausted = sniffed.exhausted;
    let mut upstream = sniffed.response;

    tokio::spawn(async move {
        if tx.send(Ok(prefix)).await.is_err() {
            return;
        }
        if exhausted {
            return;
        }
        let Some(resp) = upstream.take() else { return };
        let mut resp = resp;
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                chunk = resp.chunk() => {
                    match chunk {
                        Ok(Some(bytes)) => {
                            if tx.send(Ok(bytes)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            let _ = tx.send(Err(std::io::Error::other(err.to_string()))).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
    let mut response = Response::builder().status(status);
    for (name, value) in headers.iter() {
        response = response.header(name, value);
    }
    response
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| (StatusCode::BAD_GATEWAY, "upstream stream could not be forwarded").into_response())
}

