//! Product URL resolution: cache, fetch, extract, mirror merge, screenshot fallback.

use std::sync::Arc;

use crate::{
    app::AppError,
    extract::extract,
    product::{Extraction, Product, ProductSource},
    scrape::{check_url, FetchRoute, HtmlFetcher},
    screenshot::screenshot_url,
};

/// Storage for resolved products, keyed by the requested URL.
pub trait ProductCache: Send + Sync {
    fn get(&self, url: &str) -> anyhow::Result<Option<Product>>;
    fn put(&self, product: &Product) -> anyhow::Result<()>;
}

pub struct Resolver {
    fetcher: Arc<HtmlFetcher>,
    cache: Option<Arc<dyn ProductCache>>,
}

impl Resolver {
    pub fn new(fetcher: Arc<HtmlFetcher>, cache: Option<Arc<dyn ProductCache>>) -> Self {
        Self { fetcher, cache }
    }

    /// Resolve `url` into a product. Only an unusable URL is an error; every
    /// fetch or parse failure degrades to a screenshot-backed product.
    pub fn resolve(&self, url: &str) -> Result<Product, AppError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::BadRequest("url is required".to_string()));
        }

        let normalized = check_url(url, self.fetcher.config())
            .map_err(|err| AppError::BadRequest(err.to_string()))?
            .to_string();
        let url = normalized.as_str();

        if let Some(cache) = &self.cache {
            match cache.get(url) {
                Ok(Some(product)) => {
                    log::info!("{url}: cache hit");
                    return Ok(product);
                }
                Ok(None) => {}
                Err(err) => log::warn!("{url}: cache lookup failed: {err:#}"),
            }
        }

        let (product, fetched) = self.scrape(url);

        match &self.cache {
            Some(_) if !fetched => log::debug!("{url}: fetch failed, not caching"),
            Some(cache) => {
                if let Err(err) = cache.put(&product) {
                    log::warn!("{url}: cache upsert failed: {err:#}");
                }
            }
            None => {}
        }

        Ok(product)
    }

    /// Fetch and extract without touching the cache. Also reports whether any
    /// route actually returned the page.
    fn scrape(&self, url: &str) -> (Product, bool) {
        let config = self.fetcher.config();
        let mut fetched = true;

        let extraction = match self.fetcher.fetch_html(url) {
            Ok(page) => {
                let mut extraction = extract(&page.html, &page.final_url);
                log::info!(
                    "{url}: {} fetch found [{}]",
                    page.route,
                    extraction.describe_fields()
                );

                if page.route == FetchRoute::Origin
                    && !extraction.is_complete()
                    && config.merge_mirror
                {
                    match self.fetcher.fetch_mirror(url) {
                        Ok(mirror) => {
                            let overlay = extract(&mirror.html, &page.final_url);
                            log::debug!(
                                "{url}: mirror found [{}]",
                                overlay.describe_fields()
                            );
                            extraction = extraction.merge(overlay);
                        }
                        Err(err) => log::debug!("{url}: mirror merge skipped: {err}"),
                    }
                }

                extraction
            }
            Err(err) => {
                log::warn!("{url}: {err}");
                fetched = false;
                Extraction::default()
            }
        };

        let (extraction, source) = match extraction.image {
            Some(_) => (extraction, ProductSource::Auto),
            None => {
                let image = screenshot_url(&config.screenshot_url, url);
                log::info!("{url}: no image found, using screenshot");
                (
                    Extraction {
                        image: Some(image),
                        ..extraction
                    },
                    ProductSource::Screenshot,
                )
            }
        };

        (Product::from_extraction(url, extraction, source), fetched)
    }
}
