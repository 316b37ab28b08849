//! Product metadata extraction from raw HTML.
//!
//! Sources are consulted in a fixed priority order:
//! JSON-LD `Product` data, Open Graph / Twitter meta tags, `<link>` image hints,
//! `srcset` and `<img>` candidates, and finally a regex sniff over the whole page.

pub mod images;
pub mod json_ld;
pub mod price;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use crate::product::Extraction;
use images::ImageCandidates;

const TITLE_META_KEYS: [&str; 2] = ["og:title", "twitter:title"];
const PRICE_META_KEYS: [&str; 2] = ["product:price:amount", "og:price:amount"];
const IMAGE_META_KEYS: [&str; 5] = [
    "og:image",
    "og:image:secure_url",
    "og:image:url",
    "twitter:image",
    "twitter:image:src",
];

static META_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("meta").expect("Failed to parse meta selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("Failed to parse title selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[href]").expect("Failed to parse link selector"));
static ITEMPROP_PRICE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[itemprop="price"]"#).expect("Failed to parse itemprop selector")
});

/// Resolve `maybe_relative` against `base`. Returns the input untouched when either fails to parse.
pub fn resolve_url(base: &str, maybe_relative: &str) -> String {
    match Url::parse(base).and_then(|base| base.join(maybe_relative)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => maybe_relative.to_string(),
    }
}

/// `<meta>` key/value pairs keyed by lowercased `property` and `name`.
struct MetaTags(Vec<(String, String)>);

impl MetaTags {
    fn collect(document: &Html) -> Self {
        let mut tags = Vec::new();

        for element in document.select(&META_SELECTOR) {
            let content = element.attr("content").unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }

            for attr in ["property", "name"] {
                if let Some(key) = element.attr(attr) {
                    tags.push((key.trim().to_ascii_lowercase(), content.to_string()));
                }
            }
        }

        MetaTags(tags)
    }

    /// Value of the first key (in `keys` order) present on the page.
    fn first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_str())
    }
}

pub fn extract(html: &str, base_url: &str) -> Extraction {
    let document = Html::parse_document(html);
    let meta = MetaTags::collect(&document);
    let product = json_ld::find_product(&document);

    let title = product
        .as_ref()
        .and_then(json_ld::product_name)
        .or_else(|| meta.first(&TITLE_META_KEYS).map(str::to_string))
        .or_else(|| title_tag(&document));

    let price = product
        .as_ref()
        .and_then(json_ld::offer_price)
        .or_else(|| meta.first(&PRICE_META_KEYS).and_then(price::normalize_price))
        .or_else(|| itemprop_price(&document))
        .or_else(|| price::loose_price(html));

    let mut candidates = ImageCandidates::new(base_url);
    if let Some(product) = &product {
        for image in json_ld::product_images(product) {
            candidates.push(&image);
        }
    }
    for key in IMAGE_META_KEYS {
        if let Some(image) = meta.get(key) {
            candidates.push(image);
        }
    }
    for href in link_image_hints(&document) {
        candidates.push(href);
    }
    if let Some(image) = images::largest_srcset(&document) {
        candidates.push(&image);
    }
    if let Some(image) = images::longest_img_src(&document) {
        candidates.push(&image);
    }

    let image = candidates
        .pick()
        .or_else(|| images::sniff_image_url(html));

    Extraction {
        title,
        image,
        price,
    }
}

fn title_tag(document: &Html) -> Option<String> {
    document
        .select(&TITLE_SELECTOR)
        .map(|element| element.text().collect::<String>())
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
}

fn itemprop_price(document: &Html) -> Option<String> {
    document.select(&ITEMPROP_PRICE_SELECTOR).find_map(|element| {
        let raw = match element.attr("content") {
            Some(content) => content.to_string(),
            None => element.text().collect::<String>(),
        };
        price::normalize_price(&raw)
    })
}

/// `<link rel="image_src">` and `<link rel="preload" as="image">` hrefs, in document order.
fn link_image_hints(document: &Html) -> Vec<&str> {
    let mut hints = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let rel = element.attr("rel").unwrap_or_default().to_ascii_lowercase();
        let link_as = element.attr("as").unwrap_or_default();
        let href = element.attr("href").unwrap_or_default();

        let is_image_src = rel.split_whitespace().any(|r| r == "image_src");
        let is_image_preload =
            rel.split_whitespace().any(|r| r == "preload") && link_as.eq_ignore_ascii_case("image");

        if (is_image_src || is_image_preload) && !href.trim().is_empty() {
            hints.push(href);
        }
    }

    hints
}
