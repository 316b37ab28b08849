use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::resolve_url;

const IMAGE_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".jfif"];

/// `<img>` attributes that may carry the real (possibly lazy-loaded) source.
const IMG_SOURCE_ATTRS: [&str; 5] = [
    "src",
    "data-src",
    "data-original",
    "data-lazy-src",
    "data-zoom-image",
];

static IMG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img").expect("Failed to parse img selector"));

static SRCSET_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("img[srcset], source[srcset], img[data-srcset], source[data-srcset]")
        .expect("Failed to parse srcset selector")
});

static IMAGE_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)https?://[^\s"'<>()\\]+?\.(?:jpe?g|png|gif|webp|avif)(?:\?[^\s"'<>()\\]*)?"#,
    )
    .expect("Failed to compile image url regex")
});

/// Ordered image URL candidates, already resolved against the page URL.
#[derive(Debug)]
pub struct ImageCandidates<'a> {
    base_url: &'a str,
    urls: Vec<String>,
}

impl<'a> ImageCandidates<'a> {
    pub fn new(base_url: &'a str) -> Self {
        Self {
            base_url,
            urls: Vec::new(),
        }
    }

    pub fn push(&mut self, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") {
            return;
        }

        let resolved = resolve_url(self.base_url, raw);
        if !self.urls.contains(&resolved) {
            self.urls.push(resolved);
        }
    }

    /// First candidate with a known image extension, else the first candidate.
    pub fn pick(&self) -> Option<String> {
        self.urls
            .iter()
            .find(|url| has_image_extension(url))
            .or_else(|| self.urls.first())
            .cloned()
    }
}

pub fn has_image_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };

    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Split a `srcset` attribute into `(url, descriptor)` pairs.
/// Width and density descriptors are both read as plain numbers; a missing one counts as 1.
pub fn parse_srcset(srcset: &str) -> Vec<(String, f32)> {
    let mut entries = Vec::new();
    let mut pending: Option<String> = None;

    for token in srcset_tokens(srcset) {
        let closes_entry = token.ends_with(',');
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }

        match descriptor_size(token) {
            Some(size) if pending.is_some() => {
                if let Some(url) = pending.take() {
                    entries.push((url, size));
                }
            }
            _ => {
                if let Some(url) = pending.replace(token.to_string()) {
                    entries.push((url, 1.0));
                }
            }
        }

        if closes_entry {
            if let Some(url) = pending.take() {
                entries.push((url, 1.0));
            }
        }
    }

    if let Some(url) = pending {
        entries.push((url, 1.0));
    }

    entries
}

/// Whitespace tokens, with `800w,next.jpg` split after the descriptor's comma.
fn srcset_tokens(srcset: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    for token in srcset.split_whitespace() {
        match token.split_once(',') {
            Some((head, tail)) if !tail.is_empty() && descriptor_size(head).is_some() => {
                tokens.push(&token[..=head.len()]);
                tokens.push(tail);
            }
            _ => tokens.push(token),
        }
    }
    tokens
}

fn descriptor_size(token: &str) -> Option<f32> {
    let number = token.strip_suffix('w').or_else(|| token.strip_suffix('x'))?;
    number.parse::<f32>().ok()
}

/// Largest entry across every `srcset` on the page.
pub fn largest_srcset(document: &Html) -> Option<String> {
    let mut best: Option<(String, f32)> = None;

    for element in document.select(&SRCSET_SELECTOR) {
        let srcset = element
            .attr("srcset")
            .or_else(|| element.attr("data-srcset"))
            .unwrap_or_default();

        for (url, size) in parse_srcset(srcset) {
            if url.starts_with("data:") {
                continue;
            }
            if best.as_ref().map_or(true, |(_, best_size)| size > *best_size) {
                best = Some((url, size));
            }
        }
    }

    best.map(|(url, _)| url)
}

/// Longest `<img>` source URL; longer URLs tend to be the full-size product shots.
pub fn longest_img_src(document: &Html) -> Option<String> {
    let mut best: Option<&str> = None;

    for element in document.select(&IMG_SELECTOR) {
        for attr in IMG_SOURCE_ATTRS {
            let value = match element.attr(attr) {
                Some(v) => v.trim(),
                None => continue,
            };
            if value.is_empty() || value.starts_with("data:") {
                continue;
            }
            if best.map_or(true, |b| value.len() > b.len()) {
                best = Some(value);
            }
        }
    }

    best.map(str::to_string)
}

/// Last resort: any absolute image-looking URL in the raw page, inline scripts included.
pub fn sniff_image_url(html: &str) -> Option<String> {
    let unescaped = html.replace("\\/", "/");
    IMAGE_URL_REGEX
        .find(&unescaped)
        .map(|m| m.as_str().to_string())
}
