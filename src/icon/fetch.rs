use reqwest::header::{ACCEPT, CONTENT_TYPE};
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::config::DockConfig;
use crate::error::{DockError, Result};
use crate::icon::encode::parse_data_uri;
use crate::model::{collapse_whitespace, is_http_or_https_url};
use crate::relay::{HostRelay, OutboundMessage};

const FETCH_RETRIES: usize = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedIcon {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub source: Url,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedPage {
    pub final_url: Url,
    pub html: String,
}

/// Network access used by the icon chain and the add flow.
pub trait IconFetcher {
    fn fetch_icon(&self, url: &Url) -> impl Future<Output = Result<FetchedIcon>>;
    /// `Ok(None)` when the page exists but is not usable HTML.
    fn fetch_page(&self, url: &Url) -> impl Future<Output = Result<Option<FetchedPage>>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_icon_bytes: usize,
    max_html_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &DockConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(8))
            .timeout(config.fetch_timeout())
            .connect_timeout(Duration::from_millis(config.fetch_timeout_ms.min(2000)))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            max_icon_bytes: config.max_icon_bytes,
            max_html_bytes: config.max_html_bytes,
        })
    }
}

impl IconFetcher for HttpFetcher {
    async fn fetch_icon(&self, url: &Url) -> Result<FetchedIcon> {
        let mut last_error: Option<DockError> = None;

        for attempt in 1..=(FETCH_RETRIES + 1) {
            let response = match self
                .client
                .get(url.clone())
                .header(ACCEPT, "image/*,*/*;q=0.8")
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    log::debug!("favicon request failed for {} (attempt {}): {}", url, attempt, err);
                    last_error = Some(err.into());
                    continue;
                }
            };

            if !response.status().is_success() {
                return Err(DockError::Fetch(format!(
                    "favicon request returned status {} for {}",
                    response.status(),
                    url
                )));
            }
            if let Some(content_length) = response.content_length() {
                if content_length as usize > self.max_icon_bytes {
                    return Err(DockError::Fetch(format!(
                        "favicon too large for {} ({} bytes > {} bytes)",
                        url, content_length, self.max_icon_bytes
                    )));
                }
            }

            let source = response.url().clone();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let Some(bytes) = read_capped(response, self.max_icon_bytes).await? else {
                return Err(DockError::Fetch(format!(
                    "favicon too large for {} (over {} bytes)",
                    url, self.max_icon_bytes
                )));
            };
            if bytes.is_empty() {
                return Err(DockError::Fetch(format!("favicon response empty: {}", url)));
            }
            return Ok(FetchedIcon {
                bytes,
                content_type,
                source,
            });
        }

        Err(last_error.unwrap_or_else(|| DockError::Fetch(format!("failed to download favicon: {}", url))))
    }

    async fn fetch_page(&self, url: &Url) -> Result<Option<FetchedPage>> {
        let mut last_error: Option<DockError> = None;

        for attempt in 1..=(FETCH_RETRIES + 1) {
            let response = match self
                .client
                .get(url.clone())
                .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    log::debug!("page request failed for {} (attempt {}): {}", url, attempt, err);
                    last_error = Some(err.into());
                    continue;
                }
            };

            let final_url = response.url().clone();
            if !is_http_or_https_url(&final_url) {
                return Err(DockError::InvalidUrl(format!(
                    "redirected to unsupported url scheme: {}",
                    final_url
                )));
            }
            if !response.status().is_success() {
                log::debug!("page request returned status {} for {}", response.status(), final_url);
                return Ok(None);
            }
            if response
                .content_length()
                .is_some_and(|length| length as usize > self.max_html_bytes)
            {
                return Ok(None);
            }

            let is_html = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| {
                    let value = value.to_ascii_lowercase();
                    value.contains("text/html") || value.contains("application/xhtml")
                })
                .unwrap_or(true);
            if !is_html {
                return Ok(None);
            }

            let Some(bytes) = read_capped(response, self.max_html_bytes).await? else {
                log::debug!("page {} exceeds {} bytes", final_url, self.max_html_bytes);
                return Ok(None);
            };
            return Ok(Some(FetchedPage {
                final_url,
                html: String::from_utf8_lossy(&bytes).into_owned(),
            }));
        }

        Err(last_error.unwrap_or_else(|| DockError::Fetch(format!("page request failed: {}", url))))
    }
}

/// Reads the body chunk by chunk, giving up as soon as it passes `limit`.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

/// Asks the host (which is not subject to page CORS rules) for the icon via a
/// `getFavicon` request. The host answers with `{ "dataUrl": "data:..." }`.
pub struct RelayFetcher<R> {
    relay: R,
}

impl<R> RelayFetcher<R> {
    pub fn new(relay: R) -> Self {
        Self { relay }
    }
}

impl<R: HostRelay> IconFetcher for RelayFetcher<R> {
    async fn fetch_icon(&self, url: &Url) -> Result<FetchedIcon> {
        let reply = self
            .relay
            .request(OutboundMessage::GetFavicon {
                url: url.to_string(),
            })
            .await?;
        let data_url = reply
            .get("dataUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| DockError::Fetch(format!("host returned no favicon for {}", url)))?;
        let (media_type, bytes) = parse_data_uri(data_url)
            .ok_or_else(|| DockError::Fetch(format!("host returned a malformed data url for {}", url)))?;
        Ok(FetchedIcon {
            bytes,
            content_type: Some(media_type),
            source: url.clone(),
        })
    }

    async fn fetch_page(&self, _url: &Url) -> Result<Option<FetchedPage>> {
        Ok(None)
    }
}

/// Page title (`<title>`, then `og:title`).
pub fn html_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    if let Ok(title_selector) = Selector::parse("title") {
        if let Some(node) = document.select(&title_selector).next() {
            let text = collapse_whitespace(&node.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    let meta_selector = Selector::parse("meta").ok()?;
    document.select(&meta_selector).find_map(|node| {
        let property = node
            .value()
            .attr("property")
            .or_else(|| node.value().attr("name"))
            .map(|value| value.trim().to_ascii_lowercase());
        if property.as_deref() != Some("og:title") {
            return None;
        }
        node.value()
            .attr("content")
            .map(collapse_whitespace)
            .filter(|value| !value.is_empty())
    })
}

/// Icon urls declared by the page, best first, ending with `/favicon.ico`.
pub fn html_icon_candidates(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut weighted: Vec<(u8, Url)> = Vec::new();

    if let Ok(link_selector) = Selector::parse("link[href]") {
        for node in document.select(&link_selector) {
            let rel = node
                .value()
                .attr("rel")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_default();
            let priority = if rel.contains("shortcut icon") {
                0
            } else if rel
                .split_whitespace()
                .any(|token| token == "icon" || token == "shortcut")
            {
                1
            } else if rel.contains("apple-touch-icon") {
                2
            } else {
                continue;
            };

            let href = match node.value().attr("href") {
                Some(href) if !href.trim().is_empty() => href.trim(),
                _ => continue,
            };
            match base.join(href) {
                Ok(resolved) if is_http_or_https_url(&resolved) => weighted.push((priority, resolved)),
                _ => continue,
            }
        }
    }

    weighted.sort_by_key(|(priority, _)| *priority);
    let mut seen = BTreeSet::new();
    let mut candidates: Vec<Url> = weighted
        .into_iter()
        .map(|(_, url)| url)
        .filter(|url| seen.insert(url.as_str().to_string()))
        .collect();
    if let Some(fallback) = well_known_icon(base) {
        if seen.insert(fallback.as_str().to_string()) {
            candidates.push(fallback);
        }
    }
    candidates
}

pub fn well_known_icon(base: &Url) -> Option<Url> {
    base.join("/favicon.ico")
        .ok()
        .filter(is_http_or_https_url)
}
