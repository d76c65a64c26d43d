/// Smoke-test for `BrowserRenderer`.
///
/// Launches a headless Chromium, renders <https://example.com> narrowed to
/// its `<h1>`, and checks the fragment.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use pagewatch_client::BrowserRenderer;
use pagewatch_core::traits::{RenderRequest, Renderer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let renderer = BrowserRenderer::new();
    let url = "https://example.com";
    println!("Rendering {url} ...");

    let output = renderer
        .render(RenderRequest {
            url,
            user_agent: "pagewatch-smoke",
            selector: Some("h1"),
        })
        .await?;

    assert!(output.selector_applied, "selector was not applied");
    assert_eq!(output.html, "<h1>Example Domain</h1>");

    let full = renderer
        .render(RenderRequest {
            url,
            user_agent: "pagewatch-smoke",
            selector: None,
        })
        .await?;
    assert!(
        full.html.len() > 500,
        "HTML suspiciously short ({} bytes)",
        full.html.len()
    );

    println!("OK, full page is {} bytes", full.html.len());
    renderer.shutdown().await;
    Ok(())
}
