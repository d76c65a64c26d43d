use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use pagewatch_core::error::AppError;
use pagewatch_core::traits::{RenderOutput, RenderRequest, Renderer};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout};

/// Opening a tab on the shared browser.
const CONTEXT_TIMEOUT: Duration = Duration::from_secs(15);
/// Configuring the tab before navigation.
const PAGE_SETUP_TIMEOUT: Duration = Duration::from_secs(10);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_TIMEOUT_NO_SELECTOR: Duration = Duration::from_secs(20);
/// How long a selector may take to appear at all.
const SELECTOR_TIMEOUT: Duration = Duration::from_secs(15);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READY_POLL_BUDGET: Duration = Duration::from_secs(10);

/// Headless-browser renderer using Chromium via the Chrome DevTools Protocol.
///
/// The browser is launched on first use and shared by every clone. Each
/// render opens its own tab and closes it afterwards. A failure to open a
/// tab means the browser itself is gone: it is dropped and relaunched on
/// the next render. Failures inside a page never touch the browser.
#[derive(Clone, Default)]
pub struct BrowserRenderer {
    browser: Arc<Mutex<Option<Arc<Browser>>>>,
}

impl BrowserRenderer {
    /// A renderer that has not launched anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    async fn browser(&self) -> Result<Arc<Browser>, AppError> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(Arc::clone(browser));
        }
        let browser = Arc::new(launch().await?);
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }

    async fn invalidate(&self) {
        if let Some(browser) = self.browser.lock().await.take() {
            tracing::warn!("Discarding browser after a hard failure");
            close(browser).await;
        }
    }

    async fn open_page(&self) -> Result<Page, AppError> {
        let browser = self.browser().await?;
        match timeout(CONTEXT_TIMEOUT, browser.new_page("about:blank")).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => {
                drop(browser);
                self.invalidate().await;
                Err(AppError::RenderError(format!("Failed to open page: {e}")))
            }
            Err(_) => {
                drop(browser);
                self.invalidate().await;
                Err(AppError::RenderError("newPage timed out".into()))
            }
        }
    }
}

impl Renderer for BrowserRenderer {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderOutput, AppError> {
        let page = self.open_page().await?;
        let result = render_page(&page, request).await;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Closing page failed");
        }
        if let Err(e) = &result {
            tracing::debug!(url = %request.url, error = %e, "Render failed");
        }
        result
    }

    async fn shutdown(&self) {
        if let Some(browser) = self.browser.lock().await.take() {
            close(browser).await;
        }
    }
}

async fn render_page(page: &Page, request: RenderRequest<'_>) -> Result<RenderOutput, AppError> {
    timeout(
        PAGE_SETUP_TIMEOUT,
        page.execute(SetUserAgentOverrideParams::new(request.user_agent)),
    )
    .await
    .map_err(|_| AppError::RenderError("page setup timed out".into()))?
    .map_err(|e| AppError::RenderError(format!("Failed to set user agent: {e}")))?;

    let navigation_timeout = if request.selector.is_some() {
        NAVIGATION_TIMEOUT
    } else {
        NAVIGATION_TIMEOUT_NO_SELECTOR
    };
    timeout(navigation_timeout, page.goto(request.url))
        .await
        .map_err(|_| AppError::Timeout(navigation_timeout.as_secs()))?
        .map_err(|e| {
            AppError::RenderError(format!("Failed to navigate to {}: {e}", request.url))
        })?;

    if let Some(selector) = request.selector {
        if wait_for_selector(page, selector).await {
            wait_until_ready(page, selector).await;
            let html: String = evaluate(page, extraction_script(selector)).await?;
            return Ok(RenderOutput {
                html,
                selector_applied: true,
            });
        }
        tracing::debug!(url = %request.url, %selector, "Selector never appeared, using full page");
    }

    let html = page
        .content()
        .await
        .map_err(|e| AppError::RenderError(format!("Failed to read page content: {e}")))?;
    Ok(RenderOutput {
        html,
        selector_applied: false,
    })
}

/// True once `selector` matches, false if it did not within the timeout.
async fn wait_for_selector(page: &Page, selector: &str) -> bool {
    timeout(SELECTOR_TIMEOUT, async {
        while page.find_element(selector).await.is_err() {
            sleep(READY_POLL_INTERVAL).await;
        }
    })
    .await
    .is_ok()
}

/// Poll until the matched elements carry real content. Gives up silently
/// once the budget is spent; whatever is there then gets extracted.
async fn wait_until_ready(page: &Page, selector: &str) {
    let script = readiness_script(selector);
    let deadline = Instant::now() + READY_POLL_BUDGET;
    while Instant::now() < deadline {
        if let Ok(true) = evaluate::<bool>(page, script.clone()).await {
            return;
        }
        sleep(READY_POLL_INTERVAL).await;
    }
    tracing::debug!(%selector, "Content not ready within budget");
}

async fn evaluate<T: serde::de::DeserializeOwned>(
    page: &Page,
    script: String,
) -> Result<T, AppError> {
    page.evaluate(script)
        .await
        .map_err(|e| AppError::RenderError(format!("Script failed: {e}")))?
        .into_value()
        .map_err(|e| AppError::RenderError(format!("Unexpected script result: {e:?}")))
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// True when any match holds more than 5 chars of text or 20 of markup.
fn readiness_script(selector: &str) -> String {
    format!(
        "Array.from(document.querySelectorAll({})).some(e => {{ \
            const txt = (e.innerText || e.textContent || '').trim(); \
            const html = (e.innerHTML || '').trim(); \
            return txt.length > 5 || html.length > 20; \
        }})",
        js_string(selector)
    )
}

fn extraction_script(selector: &str) -> String {
    format!(
        "Array.from(document.querySelectorAll({})).map(e => e.outerHTML).join('\\n')",
        js_string(selector)
    )
}

async fn launch() -> Result<Browser, AppError> {
    let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

    if let Some(bin) = find_chrome_binary() {
        tracing::info!("Using Chrome binary: {}", bin.display());
        builder = builder.chrome_executable(bin);
    }

    let config = builder
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-setuid-sandbox")
        .arg("--no-first-run")
        .build()
        .map_err(|e| AppError::RenderError(format!("Browser config error: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AppError::RenderError(format!("Failed to launch browser: {e}")))?;

    // The CDP handler must be polled continuously for the connection to work.
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                tracing::warn!("Browser CDP handler error: {event:?}");
                break;
            }
        }
    });

    tracing::info!("Headless browser launched");
    Ok(browser)
}

async fn close(browser: Arc<Browser>) {
    match Arc::try_unwrap(browser) {
        Ok(mut browser) => {
            if let Err(e) = browser.close().await {
                tracing::debug!(error = %e, "Closing browser failed");
            }
            let _ = browser.wait().await;
            tracing::info!("Headless browser closed");
        }
        Err(_) => tracing::debug!("Browser still in use, leaving it to be dropped"),
    }
}

/// Locate a Chrome/Chromium binary, honouring `CHROME_BIN`.
///
/// The snap wrapper at `/snap/bin/chromium` strips unknown flags and
/// breaks headless mode, so the real binary inside the snap is preferred.
/// `None` leaves the lookup to `chromiumoxide`.
fn find_chrome_binary() -> Option<PathBuf> {
    let candidates: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_escape_selector() {
        let script = extraction_script(r#"a[href="x'y"]"#);
        assert!(script.contains(r#"querySelectorAll("a[href=\"x'y\"]")"#));
        assert!(script.ends_with(".join('\\n')"));
    }

    #[test]
    fn test_readiness_thresholds() {
        let script = readiness_script("#price");
        assert!(script.contains(r##"querySelectorAll("#price")"##));
        assert!(script.contains("txt.length > 5"));
        assert!(script.contains("html.length > 20"));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_render_with_selector() {
        let renderer = BrowserRenderer::new();
        let output = renderer
            .render(RenderRequest {
                url: "data:text/html,<h1>Title</h1><p id='x'>Some rendered text</p>",
                user_agent: "pagewatch-test",
                selector: Some("#x"),
            })
            .await
            .expect("render failed");
        assert!(output.selector_applied);
        assert_eq!(output.html, r#"<p id="x">Some rendered text</p>"#);
        renderer.shutdown().await;
    }
}
