//! Favicon resolution: an ordered chain of fallible sources, first success
//! wins, with a synthesized glyph tile as the final answer.

pub mod encode;
pub mod fetch;
pub mod glyph;

use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::config::DockConfig;
use crate::error::{DockError, Result};
use crate::model::{domain_of, find_url, item_at, AppItem, AppList, Location};
use crate::store::{AppStore, KeyValueStore};

pub use encode::{encode_icon, is_usable_icon, parse_data_uri};
pub use fetch::{
    html_icon_candidates, html_title, well_known_icon, FetchedIcon, FetchedPage, HttpFetcher,
    IconFetcher, RelayFetcher,
};
pub use glyph::{default_icon, icon_glyph};

/// One open tab or view as reported by the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    pub url: String,
    #[serde(default, alias = "favIconUrl")]
    pub favicon_ref: Option<String>,
}

/// Tab/view inventory provided by the host.
pub trait TabInventory {
    fn query_active(&self) -> impl Future<Output = Result<Option<ViewInfo>>>;
    fn query_all(&self) -> impl Future<Output = Result<Vec<ViewInfo>>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IconSource {
    /// The active view, when it shows the target's domain.
    ActiveView,
    /// Any other open view on the target's domain.
    OpenViews,
    /// Third-party favicon-by-domain service.
    FaviconService,
    /// Icons declared by the page, then `/favicon.ico`.
    SiteIcon,
}

pub const DEFAULT_SOURCES: [IconSource; 4] = [
    IconSource::ActiveView,
    IconSource::OpenViews,
    IconSource::FaviconService,
    IconSource::SiteIcon,
];

pub struct IconResolver<T, F> {
    tabs: T,
    fetcher: F,
    sources: Vec<IconSource>,
    config: DockConfig,
    cache: RefCell<HashMap<String, String>>,
}

impl<T: TabInventory, F: IconFetcher> IconResolver<T, F> {
    pub fn new(tabs: T, fetcher: F, config: &DockConfig) -> Self {
        Self {
            tabs,
            fetcher,
            sources: DEFAULT_SOURCES.to_vec(),
            config: config.clone(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_sources(mut self, sources: Vec<IconSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Always yields a renderable image reference.
    pub async fn resolve(&self, url: &str, title: &str) -> String {
        let target = match Url::parse(url) {
            Ok(target) => target,
            Err(err) => {
                log::debug!("icon target {} is not a url ({}); using default icon", url, err);
                return default_icon(title, "", self.config.icon_size);
            }
        };
        let Some(domain) = domain_of(url) else {
            return default_icon(title, "", self.config.icon_size);
        };

        if let Some(cached) = self.cache.borrow().get(&domain) {
            return cached.clone();
        }

        for source in &self.sources {
            let attempt = self.attempt(*source, &target, &domain);
            match bounded(self.config.fetch_timeout(), "icon source", attempt).await {
                Ok(icon) => {
                    log::debug!("icon for {} resolved via {:?}", domain, source);
                    self.cache.borrow_mut().insert(domain, icon.clone());
                    return icon;
                }
                Err(err) => log::warn!("icon source {:?} failed for {}: {}", source, domain, err),
            }
        }

        default_icon(title, &domain, self.config.icon_size)
    }

    async fn attempt(&self, source: IconSource, target: &Url, domain: &str) -> Result<String> {
        match source {
            IconSource::ActiveView => {
                let active = self
                    .tabs
                    .query_active()
                    .await?
                    .ok_or_else(|| DockError::Fetch("no active view".to_string()))?;
                let reference = matching_favicon(&active, domain)
                    .ok_or_else(|| DockError::Fetch("active view is on another domain".to_string()))?;
                self.load_reference(reference).await
            }
            IconSource::OpenViews => {
                let views = self.tabs.query_all().await?;
                let mut last_error = DockError::Fetch("no open view on this domain".to_string());
                for reference in views.iter().filter_map(|view| matching_favicon(view, domain)) {
                    match self.load_reference(reference).await {
                        Ok(icon) => return Ok(icon),
                        Err(err) => last_error = err,
                    }
                }
                Err(last_error)
            }
            IconSource::FaviconService => {
                let service_url = Url::parse(&self.config.favicon_service_url(domain))
                    .map_err(|err| DockError::InvalidUrl(format!("favicon service url: {}", err)))?;
                self.fetch_and_encode(&service_url).await
            }
            IconSource::SiteIcon => {
                let candidates = match self.fetcher.fetch_page(target).await {
                    Ok(Some(page)) => html_icon_candidates(&page.html, &page.final_url),
                    Ok(None) => well_known_icon(target).into_iter().collect(),
                    Err(err) => {
                        log::debug!("page fetch failed for {}: {}; trying /favicon.ico", target, err);
                        well_known_icon(target).into_iter().collect()
                    }
                };
                let mut last_error = DockError::Fetch("no icon candidates".to_string());
                for candidate in candidates {
                    match self.fetch_and_encode(&candidate).await {
                        Ok(icon) => return Ok(icon),
                        Err(err) => {
                            log::debug!("icon candidate {} failed: {}", candidate, err);
                            last_error = err;
                        }
                    }
                }
                Err(last_error)
            }
        }
    }

    async fn load_reference(&self, reference: &str) -> Result<String> {
        if let Some((media_type, bytes)) = parse_data_uri(reference) {
            return encode_icon(
                &bytes,
                Some(&media_type),
                None,
                self.config.icon_size,
                self.config.max_icon_bytes,
            );
        }
        let url = Url::parse(reference)
            .map_err(|err| DockError::InvalidUrl(format!("{}: {}", reference, err)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DockError::InvalidUrl(format!(
                "view favicon is not fetchable: {}",
                reference
            )));
        }
        self.fetch_and_encode(&url).await
    }

    async fn fetch_and_encode(&self, url: &Url) -> Result<String> {
        let fetched = self.fetcher.fetch_icon(url).await?;
        encode_icon(
            &fetched.bytes,
            fetched.content_type.as_deref(),
            Some(&fetched.source),
            self.config.icon_size,
            self.config.max_icon_bytes,
        )
    }
}

/// Runs `call` under `limit`; an elapsed limit becomes [`DockError::Timeout`].
pub(crate) async fn bounded<O>(
    limit: Duration,
    what: &'static str,
    call: impl Future<Output = Result<O>>,
) -> Result<O> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| DockError::Timeout(what))?
}

fn matching_favicon<'a>(view: &'a ViewInfo, domain: &str) -> Option<&'a str> {
    if domain_of(&view.url).as_deref() != Some(domain) {
        return None;
    }
    view.favicon_ref
        .as_deref()
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
}

/// Entries whose favicon is missing or unrenderable, with the location they
/// had in `list`.
pub fn missing_icons(list: &[AppItem]) -> Vec<(Location, String, String)> {
    let mut missing = Vec::new();
    for (index, item) in list.iter().enumerate() {
        if !is_usable_icon(&item.favicon) {
            missing.push((Location::Top { index }, item.url.clone(), item.title.clone()));
        }
        for (child, entry) in item.children().iter().enumerate() {
            if !is_usable_icon(&entry.favicon) {
                missing.push((
                    Location::Child { group: index, child },
                    entry.url.clone(),
                    entry.title.clone(),
                ));
            }
        }
    }
    missing
}

/// Stores `icon` for `url` at `location` if the entry is still there,
/// otherwise wherever the url now lives. Returns false when the entry is
/// gone.
pub fn write_back_icon(list: &mut AppList, location: Location, url: &str, icon: &str) -> bool {
    let at = match item_at(list, location) {
        Some(item) if item.url == url => Some(location),
        _ if matches!(location, Location::Top { .. }) => list
            .iter()
            .position(|item| item.url == url)
            .map(|index| Location::Top { index }),
        _ => find_url(list, url),
    };
    let Some(at) = at else {
        return false;
    };
    let slot = match at {
        Location::Top { index } => list.get_mut(index),
        Location::Child { group, child } => list
            .get_mut(group)
            .and_then(|item| item.children.as_mut())
            .and_then(|children| children.get_mut(child)),
    };
    match slot {
        Some(item) => {
            item.favicon = icon.to_string();
            true
        }
        None => false,
    }
}

/// Resolves every missing icon of `list` and persists each result into a
/// fresh read of the store. Returns `list` with the icons filled in.
pub async fn backfill_icons<S, T, F>(
    store: &AppStore<S>,
    resolver: &IconResolver<T, F>,
    mut list: AppList,
) -> AppList
where
    S: KeyValueStore,
    T: TabInventory,
    F: IconFetcher,
{
    for (location, url, title) in missing_icons(&list) {
        let icon = resolver.resolve(&url, &title).await;
        write_back_icon(&mut list, location, &url, &icon);

        let mut fresh = store.get_all();
        if write_back_icon(&mut fresh, location, &url, &icon) {
            store.save_all(&fresh);
        } else {
            log::debug!("entry {} moved or was removed before its icon resolved", url);
        }
    }
    list
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    pub struct FakeTabs {
        pub active: Option<ViewInfo>,
        pub all: Vec<ViewInfo>,
        pub fail: bool,
    }

    impl TabInventory for FakeTabs {
        async fn query_active(&self) -> Result<Option<ViewInfo>> {
            if self.fail {
                return Err(DockError::Fetch("tabs unavailable".to_string()));
            }
            Ok(self.active.clone())
        }

        async fn query_all(&self) -> Result<Vec<ViewInfo>> {
            if self.fail {
                return Err(DockError::Fetch("tabs unavailable".to_string()));
            }
            Ok(self.all.clone())
        }
    }

    /// Serves a fixed set of icon urls; every other url fails.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub icons: HashMap<String, Vec<u8>>,
        pub pages: HashMap<String, String>,
        pub hang: bool,
        pub icon_requests: RefCell<Vec<String>>,
        pub page_requests: Cell<usize>,
    }

    impl FakeFetcher {
        pub fn serving(icons: &[(&str, Vec<u8>)]) -> Self {
            Self {
                icons: icons
                    .iter()
                    .map(|(url, bytes)| (url.to_string(), bytes.clone()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl IconFetcher for FakeFetcher {
        async fn fetch_icon(&self, url: &Url) -> Result<FetchedIcon> {
            self.icon_requests.borrow_mut().push(url.to_string());
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.icons
                .get(url.as_str())
                .map(|bytes| FetchedIcon {
                    bytes: bytes.clone(),
                    content_type: Some("image/png".to_string()),
                    source: url.clone(),
                })
                .ok_or_else(|| DockError::Fetch(format!("404 {}", url)))
        }

        async fn fetch_page(&self, url: &Url) -> Result<Option<FetchedPage>> {
            self.page_requests.set(self.page_requests.get() + 1);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(self.pages.get(url.as_str()).map(|html| FetchedPage {
                final_url: url.clone(),
                html: html.clone(),
            }))
        }
    }

    pub fn png(side: u32, shade: u8) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(side, side, image::Rgba([shade, shade, shade, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }
}
