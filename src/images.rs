//! Image-URL resolution for candidate imports
//!
//! Spreadsheet rows often carry share links from photo redirectors
//! instead of direct image URLs. When a URL matches a configured
//! redirector host, the resolver follows it and pulls the canonical
//! image URL out of the page's `og:image` metadata; anything else passes
//! through unchanged.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;

#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn canonical_image(&self, url: &str) -> Result<String>;
}

/// Does this URL need following? Matched against the configured
/// redirector host fragments (e.g. `photos.app.goo`).
pub fn is_redirector(url: &str, hosts: &[String]) -> bool {
    hosts.iter().any(|host| url.contains(host.as_str()))
}

/// Pull the canonical image URL from a page's embedded metadata.
pub fn extract_og_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"meta[property="og:image"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(str::to_string)
}

pub struct HttpImageResolver {
    client: reqwest::Client,
}

impl HttpImageResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpImageResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageResolver for HttpImageResolver {
    async fn canonical_image(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .context("fetching redirector page")?
            .text()
            .await
            .context("reading redirector page body")?;

        let image = extract_og_image(&body)
            .ok_or_else(|| anyhow!("no og:image metadata at {url}"))?;
        debug!("Resolved image {} -> {}", url, image);
        Ok(image)
    }
}
