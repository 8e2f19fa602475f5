//! HTTP retry helpers for transient errors.
//!
//! Sources call [`send_text`] instead of `reqwest::RequestBuilder::send()`
//! directly so every request gets a small, bounded retry with exponential
//! backoff for transient failures (timeouts, connection resets, server
//! errors, rate limiting).
//!
//! The orchestrator wraps each page fetch in its own timeout, which also
//! bounds the time spent retrying here.
//!
//! ```ignore
//! let html = retry::send_text(|| client.get(&url), policy).await?;
//! ```

use std::time::Duration;

use crate::ScrapeError;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// How many times, and how patiently, a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Returns the delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Sends an HTTP request and returns the response body as a `String`.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// Retries connection errors, timeouts, HTTP 429 and HTTP 5xx. Does **not**
/// retry other 4xx responses, which are permanent.
///
/// # Errors
///
/// Returns [`ScrapeError`] if the request fails after all retries, the
/// server returns a non-retryable status, or the body cannot be read.
#[allow(clippy::future_not_send)]
pub async fn send_text<F>(build_request: F, policy: RetryPolicy) -> Result<String, ScrapeError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, policy).await?;
    let url = response.url().to_string();

    match response.text().await {
        Ok(text) => Ok(text),
        Err(e) => {
            log::warn!("Body read failed for {url}: {e}");
            Err(ScrapeError::Http(e))
        }
    }
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// # Errors
///
/// Returns [`ScrapeError`] under the same conditions as [`send_text`], or
/// [`ScrapeError::Json`] if the body is not valid JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(
    build_request: F,
    policy: RetryPolicy,
) -> Result<serde_json::Value, ScrapeError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let text = send_text(build_request, policy).await?;
    serde_json::from_str(&text).map_err(|e| {
        log::warn!(
            "JSON parse failed: {e}\n  body preview: {}",
            preview(&text)
        );
        ScrapeError::Json(e)
    })
}

/// Core retry loop shared by [`send_text`] and [`send_json`].
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    policy: RetryPolicy,
) -> Result<reqwest::Response, ScrapeError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_retries = policy.max_retries;
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            log::debug!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(ScrapeError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                if is_retryable_status(status) {
                    if attempt < max_retries {
                        log::warn!("  HTTP {status} from {}", response.url());
                        attempt += 1;
                        continue;
                    }
                    return Err(ScrapeError::Status {
                        status: status.as_u16(),
                        url: response.url().to_string(),
                    });
                }

                if status.is_client_error() {
                    return Err(ScrapeError::Status {
                        status: status.as_u16(),
                        url: response.url().to_string(),
                    });
                }

                return Ok(response);
            }
        }
    }
}

/// Returns `true` for statuses worth retrying (429 and 5xx).
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

fn preview(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_LEN {
        return text;
    }
    let mut end = BODY_PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
