use std::sync::LazyLock;
use std::time::Duration;

use pagewatch_core::error::AppError;
use pagewatch_core::models::Summary;
use pagewatch_core::traits::Summarizer;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 3;
const MAX_DIFF_CHARS: usize = 15_000;
const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED DUE TO LENGTH]";

const SYSTEM_PROMPT: &str = "You summarize website changes for a monitoring tool.";

const INSTRUCTIONS: &str = "\
Return a concise summary of what changed. Return only what's new, not what was replaced. \
No need to describe the whole change, just the new values.

Formatting rules:
- Use a line break before starting the list
- Prefer a short bullet list.
- Keep bullets short and precise.
- If there is truly only one minor change, return a single short sentence instead of a list.
- Use standard Markdown bullet format: \"- \".

Content rules:
- Focus ONLY on meaningful content changes.
- Ignore formatting or whitespace differences.
- If numbers changed (prices, counts, dates, versions, stock levels, etc), explicitly state the previous value and the new value.
- Do not speculate.
- Do not repeat unchanged content.";

/// OpenAI-compatible chat-completions client that summarizes diffs.
#[derive(Clone)]
pub struct OpenAiSummarizer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    retry_base: Duration,
}

impl OpenAiSummarizer {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retry_base: DEFAULT_RETRY_BASE,
        })
    }

    /// Configure from `OPENAI_API_KEY` (and `OPENAI_BASE_URL` if set).
    /// `None` when no key is present.
    pub fn from_env(model: Option<&str>) -> Result<Option<Self>, AppError> {
        let Some(api_key) = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
        else {
            return Ok(None);
        };
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = model.unwrap_or(DEFAULT_SUMMARY_MODEL);
        Self::with_base_url(&api_key, model, &base_url).map(Some)
    }

    /// Delay before the first retry; doubles for each further one.
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    async fn request(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
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
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }

            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));

            return Err(AppError::SummarizerError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::HttpError(format!("Failed to parse summarizer response: {e}"))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::SummarizerError {
                message: "Empty response from model".into(),
                status_code: 200,
                retryable: false,
            })
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, url: &str, cleaned_diff: &str) -> Result<Summary, AppError> {
        let (diff, truncated) = truncate_diff(cleaned_diff);
        let prompt = build_prompt(url, &diff);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.request(&prompt).await {
                Ok(text) => {
                    return Ok(Summary {
                        processed: process_summary(&text),
                        text,
                        truncated,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = self.retry_base * 2u32.pow(attempt - 1);
                    tracing::warn!(%url, %attempt, error = %e, ?delay, "Summarizer call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let status_code = match &e {
                        AppError::SummarizerError { status_code, .. } => *status_code,
                        AppError::RateLimitExceeded => 429,
                        _ => 0,
                    };
                    return Err(AppError::SummarizerError {
                        message: format!("failed after {attempt} attempts: {e}"),
                        status_code,
                        retryable: false,
                    });
                }
            }
        }
    }
}

fn build_prompt(url: &str, diff: &str) -> String {
    format!(
        "You are analyzing a website change.\n\nURL: {url}\n\n\
         Below is a cleaned textual diff of the webpage change.\n\n\
         {INSTRUCTIONS}\n\nDiff:\n{diff}\n"
    )
}

/// Cut the diff to the request budget. Returns the text and whether it
/// was cut.
fn truncate_diff(diff: &str) -> (String, bool) {
    match diff.char_indices().nth(MAX_DIFF_CHARS) {
        Some((cut, _)) => (format!("{}{TRUNCATION_MARKER}", &diff[..cut]), true),
        None => (diff.to_string(), false),
    }
}

static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|`").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Single-line rendition: bold markers and backticks dropped, whitespace
/// collapsed.
fn process_summary(text: &str) -> String {
    let text = EMPHASIS.replace_all(text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    async fn summarizer(server: &MockServer) -> OpenAiSummarizer {
        OpenAiSummarizer::with_base_url("sk-test", "test-model", &server.uri())
            .unwrap()
            .with_retry_base(Duration::from_millis(1))
    }

    #[test]
    fn test_process_summary() {
        assert_eq!(
            process_summary("Price changed:\n\n- **Old:** `10`\n- **New:** 12"),
            "Price changed: - Old: 10 - New: 12"
        );
    }

    #[test]
    fn test_truncate_diff() {
        let (short, cut) = truncate_diff("+a");
        assert_eq!(short, "+a");
        assert!(!cut);

        let long = "x".repeat(MAX_DIFF_CHARS + 10);
        let (text, cut) = truncate_diff(&long);
        assert!(cut);
        assert!(text.ends_with("[TRUNCATED DUE TO LENGTH]"));
        assert_eq!(
            text.chars().count(),
            MAX_DIFF_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn test_prompt_carries_url_and_diff() {
        let prompt = build_prompt("http://example.test/a", "-Hello +Hello World");
        assert!(prompt.contains("URL: http://example.test/a"));
        assert!(prompt.ends_with("Diff:\n-Hello +Hello World\n"));
    }

    #[tokio::test]
    async fn summarize_returns_processed_summary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("- **New** item")))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server)
            .await
            .summarize("http://example.test/a", "+New item")
            .await
            .unwrap();

        assert_eq!(summary.text, "- **New** item");
        assert_eq!(summary.processed, "- New item");
        assert_eq!(summary.attempts, 1);
        assert!(!summary.truncated);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let summary = summarizer(&server)
            .await
            .summarize("http://example.test/a", "+x")
            .await
            .unwrap();
        assert_eq!(summary.attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = summarizer(&server)
            .await
            .summarize("http://example.test/a", "+x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::SummarizerError { status_code: 429, retryable: false, .. }
        ));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = summarizer(&server)
            .await
            .summarize("http://example.test/a", "+x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Incorrect API key"));
        assert!(err.to_string().contains("1 attempts"));
    }
}
