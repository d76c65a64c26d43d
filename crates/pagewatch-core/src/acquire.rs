//! Resolve one target into extracted content.
//!
//! Static targets try a plain HTTP GET first and fall back to the headless
//! renderer when the request fails or the selector matches nothing.
//! Dynamic targets render first and fall back to HTTP; a render failure
//! opens a backoff window during which rendering is skipped.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AppError;
use crate::extract::{first_match, select_fragment};
use crate::models::Target;
use crate::traits::{Fetcher, RenderRequest, Renderer};

/// Cooldown after a render failure of a dynamic target.
pub const RENDER_BACKOFF: TimeDelta = TimeDelta::minutes(60);

/// Which retrieval path produced the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionPath {
    Http,
    Rendered,
}

/// Extracted content of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Markup after selector and pattern extraction, before normalization.
    pub content: String,
    pub path: AcquisitionPath,
}

/// Per-target render backoff slot (`rendererFailedAt`).
pub type RenderBackoff = Option<DateTime<Utc>>;

/// True while a render failure recorded at `failed_at` is still cooling down.
pub fn in_backoff(failed_at: RenderBackoff, now: DateTime<Utc>) -> bool {
    failed_at.is_some_and(|at| now - at < RENDER_BACKOFF)
}

/// Owns the HTTP/render decision for every target.
#[derive(Clone)]
pub struct Acquirer<F, R>
where
    F: Fetcher,
    R: Renderer,
{
    fetcher: F,
    renderer: R,
}

impl<F, R> Acquirer<F, R>
where
    F: Fetcher,
    R: Renderer,
{
    pub fn new(fetcher: F, renderer: R) -> Self {
        Self { fetcher, renderer }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Retrieve and extract a target's content.
    ///
    /// `backoff` is only ever updated in memory; persisting it is the
    /// caller's business.
    pub async fn acquire(
        &self,
        target: &Target,
        user_agent: &str,
        backoff: &mut RenderBackoff,
        now: DateTime<Utc>,
    ) -> Result<Acquired, AppError> {
        let mut acquired = if target.dynamic_data {
            self.acquire_dynamic(target, user_agent, backoff, now)
                .await?
        } else {
            self.acquire_static(target, user_agent).await?
        };

        if let Some(pattern) = &target.pattern {
            acquired.content = first_match(pattern, &acquired.content);
        }
        Ok(acquired)
    }

    async fn acquire_dynamic(
        &self,
        target: &Target,
        user_agent: &str,
        backoff: &mut RenderBackoff,
        now: DateTime<Utc>,
    ) -> Result<Acquired, AppError> {
        if in_backoff(*backoff, now) {
            tracing::debug!(title = %target.title, "Renderer in backoff, using HTTP only");
            return self.fetch_and_select(target, user_agent).await;
        }

        match self.render_and_select(target, user_agent).await {
            Ok(acquired) => {
                *backoff = None;
                Ok(acquired)
            }
            Err(e) => {
                tracing::warn!(
                    title = %target.title,
                    error = %e,
                    "Render failed, backing off for {} minutes",
                    RENDER_BACKOFF.num_minutes()
                );
                *backoff = Some(now);
                self.fetch_and_select(target, user_agent).await
            }
        }
    }

    async fn acquire_static(&self, target: &Target, user_agent: &str) -> Result<Acquired, AppError> {
        let fetch_error = match self.fetch_and_select(target, user_agent).await {
            Ok(acquired) if target.selector.is_none() || !acquired.content.trim().is_empty() => {
                return Ok(acquired);
            }
            Ok(_) => {
                tracing::debug!(title = %target.title, "Selector matched nothing, rendering");
                "selector matched nothing".to_string()
            }
            Err(e) => {
                tracing::warn!(title = %target.title, error = %e, "Fetch failed, rendering");
                e.to_string()
            }
        };

        self.render_and_select(target, user_agent)
            .await
            .map_err(|render_error| AppError::Retrieval {
                url: target.url.clone(),
                message: format!("{fetch_error}; render fallback: {render_error}"),
            })
    }

    async fn fetch_and_select(&self, target: &Target, user_agent: &str) -> Result<Acquired, AppError> {
        let body = self.fetcher.fetch(&target.url, user_agent).await?;
        tracing::debug!(title = %target.title, bytes = body.len(), "Fetched");
        Ok(Acquired {
            content: select_fragment(&body, target.selector.as_deref())?,
            path: AcquisitionPath::Http,
        })
    }

    async fn render_and_select(
        &self,
        target: &Target,
        user_agent: &str,
    ) -> Result<Acquired, AppError> {
        let output = self
            .renderer
            .render(RenderRequest {
                url: &target.url,
                user_agent,
                selector: target.selector.as_deref(),
            })
            .await?;
        tracing::debug!(title = %target.title, bytes = output.html.len(), "Rendered");

        let content = if output.selector_applied {
            output.html
        } else {
            select_fragment(&output.html, target.selector.as_deref())?
        };
        Ok(Acquired {
            content,
            path: AcquisitionPath::Rendered,
        })
    }
}
