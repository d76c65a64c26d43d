use std::time::Duration;

use chrono::Utc;
use pagewatch_core::error::AppError;
use pagewatch_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use url::Url;

/// Timeout of the lightweight GET.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP fetcher using reqwest.
///
/// Every request carries the configured User-Agent and a `_t` query
/// parameter set to the current epoch millis so intermediate caches
/// never answer with a stale page.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, AppError> {
        let request_url = cache_busted(url)?;
        tracing::debug!(url = %request_url, %user_agent, "Request");

        let response = self
            .client
            .get(request_url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default()
            )));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })
    }
}

/// `url` with `_t` set to the current epoch millis, replacing any
/// existing `_t`.
fn cache_busted(url: &str) -> Result<Url, AppError> {
    let mut parsed =
        Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL {url}: {e}")))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "_t")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("_t", &Utc::now().timestamp_millis().to_string());
    Ok(parsed)
}
