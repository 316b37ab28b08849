use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("Failed to compile number regex"));

/// `"price": "1,980"` style pairs anywhere in the page, JSON-LD or inline state.
static LOOSE_PRICE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:price|lowPrice)"\s*:\s*"?(\d[\d,]*(?:\.\d+)?)"#)
        .expect("Failed to compile loose price regex")
});

/// Keep the first number in `raw`, dropping currency symbols and thousands separators.
pub fn normalize_price(raw: &str) -> Option<String> {
    let number = NUMBER_REGEX.find(raw.trim())?;
    let digits = number.as_str().replace(',', "");

    if digits.is_empty() {
        return None;
    }

    Some(digits)
}

pub fn loose_price(html: &str) -> Option<String> {
    LOOSE_PRICE_REGEX
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| normalize_price(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_decimal_unchanged() {
        assert_eq!(normalize_price("12.34").as_deref(), Some("12.34"));
    }

    #[test]
    fn test_thousands_separator_stripped() {
        assert_eq!(normalize_price("1,234.50").as_deref(), Some("1234.50"));
        assert_eq!(normalize_price("¥1,980").as_deref(), Some("1980"));
        assert_eq!(normalize_price(" $ 3,000 (tax incl.)").as_deref(), Some("3000"));
    }

    #[test]
    fn test_no_number() {
        assert_eq!(normalize_price("sold out"), None);
        assert_eq!(normalize_price(""), None);
    }

    #[test]
    fn test_loose_price() {
        let html = r#"<script>window.__STATE__ = {"sku":"A1","price": "4,990","currency":"JPY"}</script>"#;
        assert_eq!(loose_price(html).as_deref(), Some("4990"));

        let html = r#"{"lowPrice":129.5}"#;
        assert_eq!(loose_price(html).as_deref(), Some("129.5"));

        assert_eq!(loose_price("<p>no price here</p>"), None);
    }
}
