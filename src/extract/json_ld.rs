use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;

use super::price::normalize_price;

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[type]").expect("Failed to parse script selector"));

/// First schema.org `Product` node found in the page's JSON-LD blocks.
/// Blocks that fail to parse are skipped.
pub fn find_product(document: &Html) -> Option<Value> {
    for element in document.select(&SCRIPT_SELECTOR) {
        let script_type = element.attr("type").unwrap_or_default().to_ascii_lowercase();
        if !script_type.contains("ld+json") {
            continue;
        }

        let json_text = element.text().collect::<String>();
        let json = match serde_json::from_str::<Value>(json_text.trim()) {
            Ok(json) => json,
            Err(err) => {
                log::debug!("skipping malformed JSON-LD block: {err}");
                continue;
            }
        };

        if let Some(product) = find_product_node(&json) {
            return Some(product.clone());
        }
    }

    None
}

fn find_product_node(json: &Value) -> Option<&Value> {
    // Handle top-level arrays
    if let Some(arr) = json.as_array() {
        return arr.iter().find_map(find_product_node);
    }

    if is_product(json) {
        return Some(json);
    }

    // Handle @graph arrays
    if let Some(graph) = json.get("@graph") {
        if let Some(found) = find_product_node(graph) {
            return Some(found);
        }
    }

    json.get("mainEntity").and_then(find_product_node)
}

fn is_product(json: &Value) -> bool {
    match json.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("product"),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| t.eq_ignore_ascii_case("product")),
        _ => false,
    }
}

pub fn product_name(product: &Value) -> Option<String> {
    product
        .get("name")
        .or_else(|| product.get("title"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// `offers.price`, then `offers.priceSpecification.price`, then `offers.lowPrice`.
pub fn offer_price(product: &Value) -> Option<String> {
    let offers = first_of(product.get("offers")?)?;

    if let Some(price) = offers.get("price").and_then(price_from_value) {
        return Some(price);
    }

    if let Some(price) = offers
        .get("priceSpecification")
        .and_then(first_of)
        .and_then(|spec| spec.get("price"))
        .and_then(price_from_value)
    {
        return Some(price);
    }

    offers.get("lowPrice").and_then(price_from_value)
}

/// Every image URL listed on the product, in document order.
pub fn product_images(product: &Value) -> Vec<String> {
    let mut images = Vec::new();

    match product.get("image") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(url) = image_url(item) {
                    images.push(url);
                }
            }
        }
        Some(item) => {
            if let Some(url) = image_url(item) {
                images.push(url);
            }
        }
        None => {}
    }

    images
}

fn image_url(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.to_string()),
        Value::Object(o) => o
            .get("url")
            .or_else(|| o.get("contentUrl"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn first_of(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(arr) => arr.first(),
        other => Some(other),
    }
}

fn price_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => normalize_price(s),
        _ => None,
    }
}
