pub mod fetcher;
pub mod notifier;
#[cfg(feature = "browser")]
pub mod renderer;
pub mod summarizer;

pub use fetcher::ReqwestFetcher;
pub use notifier::TelegramNotifier;
#[cfg(feature = "browser")]
pub use renderer::BrowserRenderer;
pub use summarizer::OpenAiSummarizer;
