use crate::scrape::service_url;

/// URL of a rendered screenshot of `url`, served by the configured screenshot service.
pub fn screenshot_url(template: &str, url: &str) -> String {
    service_url(template, url)
}
