use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{
    fetch::{origin_router, spawn_mirror},
    product_page, spawn_server, test_config, Hits,
};
use crate::{
    app::AppError,
    config::ScrapeConfig,
    product::{Product, ProductSource, PLACEHOLDER_TITLE},
    resolver::{ProductCache, Resolver},
    scrape::HtmlFetcher,
};

#[derive(Default)]
struct MemoryCache {
    products: Mutex<HashMap<String, Product>>,
    reads: Hits,
    writes: Hits,
    broken: bool,
}

impl ProductCache for MemoryCache {
    fn get(&self, url: &str) -> anyhow::Result<Option<Product>> {
        self.reads.hit();
        if self.broken {
            anyhow::bail!("cache is down");
        }
        Ok(self.products.lock().unwrap().get(url).cloned())
    }

    fn put(&self, product: &Product) -> anyhow::Result<()> {
        self.writes.hit();
        if self.broken {
            anyhow::bail!("cache is down");
        }
        self.products
            .lock()
            .unwrap()
            .insert(product.url.clone(), product.clone());
        Ok(())
    }
}

fn resolver(config: ScrapeConfig, cache: Option<Arc<MemoryCache>>) -> Resolver {
    let fetcher = Arc::new(HtmlFetcher::new(config).unwrap());
    Resolver::new(fetcher, cache.map(|c| c as Arc<dyn ProductCache>))
}

fn config_with_mirror(mirror: std::net::SocketAddr) -> ScrapeConfig {
    let mut config = test_config().scrape;
    config.mirror_url = format!("http://{mirror}/mirror?u={{url_encoded}}");
    config
}

#[test]
fn test_resolve_og_product() {
    let origin = spawn_server(origin_router());
    let resolver = resolver(test_config().scrape, None);

    let url = format!("http://{origin}/item");
    let product = resolver.resolve(&url).unwrap();

    assert_eq!(product.url, url);
    assert_eq!(product.title, "Cool Shirt");
    assert_eq!(product.image.as_deref(), Some("https://example.com/shirt.jpg"));
    assert_eq!(product.price, None);
    assert_eq!(product.source, ProductSource::Auto);
}

#[test]
fn test_short_body_uses_mirror_before_screenshot() {
    let origin = spawn_server(origin_router());
    let (mirror, log) = spawn_mirror(Some(product_page(
        r#"<meta property="og:title" content="Mirror Shirt"><meta property="og:image" content="/m.jpg">"#,
    )));
    let resolver = resolver(config_with_mirror(mirror), None);

    let url = format!("http://{origin}/tiny");
    let product = resolver.resolve(&url).unwrap();

    assert_eq!(log.hits.count(), 1);
    assert_eq!(product.title, "Mirror Shirt");
    assert_eq!(product.image, Some(format!("http://{origin}/m.jpg")));
    assert_eq!(product.source, ProductSource::Auto);
}

#[test]
fn test_screenshot_when_everything_fails() {
    let origin = spawn_server(origin_router());
    let (mirror, log) = spawn_mirror(None);
    let resolver = resolver(config_with_mirror(mirror), None);

    let url = format!("http://{origin}/tiny");
    let product = resolver.resolve(&url).unwrap();

    assert_eq!(log.hits.count(), 1);
    assert_eq!(product.title, PLACEHOLDER_TITLE);
    assert_eq!(product.source, ProductSource::Screenshot);
    assert_eq!(
        product.image,
        Some(format!("https://image.thum.io/get/width/1200/crop/900/{url}"))
    );
}

#[test]
fn test_incomplete_origin_merged_with_mirror() {
    let origin = spawn_server(axum::Router::new().route(
        "/bare",
        axum::routing::get(|| async {
            axum::response::Html(product_page("<title>Origin Title</title>"))
        }),
    ));
    let (mirror, log) = spawn_mirror(Some(product_page(
        r#"<meta property="og:title" content="Mirror Title"><meta property="og:image" content="https://cdn.example.com/p.png">"#,
    )));
    let resolver = resolver(config_with_mirror(mirror), None);

    let product = resolver
        .resolve(&format!("http://{origin}/bare"))
        .unwrap();

    assert_eq!(log.hits.count(), 1);
    assert_eq!(product.title, "Origin Title");
    assert_eq!(product.image.as_deref(), Some("https://cdn.example.com/p.png"));
}

#[test]
fn test_mirror_merge_can_be_disabled() {
    let origin = spawn_server(axum::Router::new().route(
        "/bare",
        axum::routing::get(|| async {
            axum::response::Html(product_page("<title>Origin Title</title>"))
        }),
    ));
    let (mirror, log) = spawn_mirror(Some(product_page("")));
    let mut config = config_with_mirror(mirror);
    config.merge_mirror = false;
    let resolver = resolver(config, None);

    let product = resolver
        .resolve(&format!("http://{origin}/bare"))
        .unwrap();

    assert_eq!(log.hits.count(), 0);
    assert_eq!(product.source, ProductSource::Screenshot);
}

#[test]
fn test_invalid_urls_are_bad_requests() {
    let resolver = resolver(test_config().scrape, None);

    for url in ["", "   ", "not a url", "ftp://example.com/file"] {
        assert!(
            matches!(resolver.resolve(url), Err(AppError::BadRequest(_))),
            "{url:?} should be rejected"
        );
    }
}

#[test]
fn test_cache_hit_skips_scraping() {
    let (mirror, log) = spawn_mirror(None);
    let cache = Arc::new(MemoryCache::default());
    let url = "http://127.0.0.1:9/cached".to_string();

    cache.products.lock().unwrap().insert(
        url.clone(),
        Product {
            url: url.clone(),
            title: "Cached".to_string(),
            image: Some("https://example.com/c.jpg".to_string()),
            price: Some("1200".to_string()),
            source: ProductSource::Manual,
            fetched_at: chrono::Utc::now(),
        },
    );

    let resolver = resolver(config_with_mirror(mirror), Some(cache.clone()));
    let product = resolver.resolve(&url).unwrap();

    assert_eq!(product.title, "Cached");
    assert_eq!(product.source, ProductSource::Manual);
    assert_eq!(log.hits.count(), 0);
    assert_eq!(cache.writes.count(), 0);
}

#[test]
fn test_cache_miss_stores_product() {
    let origin = spawn_server(origin_router());
    let cache = Arc::new(MemoryCache::default());
    let resolver = resolver(test_config().scrape, Some(cache.clone()));

    let url = format!("http://{origin}/item");
    resolver.resolve(&url).unwrap();
    let again = resolver.resolve(&url).unwrap();

    assert_eq!(again.title, "Cool Shirt");
    assert_eq!(cache.reads.count(), 2);
    assert_eq!(cache.writes.count(), 1);
}

#[test]
fn test_cache_errors_are_ignored() {
    let origin = spawn_server(origin_router());
    let cache = Arc::new(MemoryCache {
        broken: true,
        ..Default::default()
    });
    let resolver = resolver(test_config().scrape, Some(cache.clone()));

    let product = resolver.resolve(&format!("http://{origin}/item")).unwrap();
    assert_eq!(product.title, "Cool Shirt");
    assert_eq!(cache.writes.count(), 1);
}

#[test]
fn test_protocol_relative_url_is_normalized() {
    let (mirror, _) = spawn_mirror(None);
    let cache = Arc::new(MemoryCache::default());
    let resolver = resolver(config_with_mirror(mirror), Some(cache.clone()));

    let dead = super::closed_addr();
    let product = resolver.resolve(&format!("//{dead}/item")).unwrap();

    let expected = format!("https://{dead}/item");
    assert_eq!(product.url, expected);
    assert_eq!(
        product.image,
        Some(format!("https://image.thum.io/get/width/1200/crop/900/{expected}"))
    );
    assert_eq!(cache.reads.count(), 1);
}

#[test]
fn test_failed_fetch_is_not_cached() {
    let origin = spawn_server(origin_router());
    let (mirror, log) = spawn_mirror(None);
    let cache = Arc::new(MemoryCache::default());
    let resolver = resolver(config_with_mirror(mirror), Some(cache.clone()));

    let url = format!("http://{origin}/missing");
    let first = resolver.resolve(&url).unwrap();
    assert_eq!(first.source, ProductSource::Screenshot);
    assert_eq!(cache.writes.count(), 0);
    assert!(cache.products.lock().unwrap().is_empty());

    // the next request scrapes again instead of serving the degraded product
    resolver.resolve(&url).unwrap();
    assert_eq!(log.hits.count(), 2);
}

#[test]
fn test_screenshot_product_from_fetched_page_is_cached() {
    let origin = spawn_server(axum::Router::new().route(
        "/bare",
        axum::routing::get(|| async {
            axum::response::Html(product_page("<title>Origin Title</title>"))
        }),
    ));
    let cache = Arc::new(MemoryCache::default());
    let mut config = test_config().scrape;
    config.merge_mirror = false;
    let resolver = resolver(config, Some(cache.clone()));

    let product = resolver.resolve(&format!("http://{origin}/bare")).unwrap();
    assert_eq!(product.source, ProductSource::Screenshot);
    assert_eq!(product.title, "Origin Title");
    assert_eq!(cache.writes.count(), 1);
}
