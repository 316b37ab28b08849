use reqwest::{
    blocking::Client,
    header::{ACCEPT, ACCEPT_LANGUAGE},
    redirect, Url,
};
use std::{error::Error, fmt::Display, net::IpAddr, time::Duration};

use crate::config::ScrapeConfig;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const MAX_REDIRECTS: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("blocked by url policy: {0}")]
    Blocked(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned {0}")]
    Status(u16),

    #[error("body too short ({0} bytes)")]
    TooShort(usize),

    #[error("origin: {origin}; mirror: {mirror}")]
    Exhausted {
        origin: Box<FetchError>,
        mirror: Box<FetchError>,
    },
}

impl FetchError {
    /// The URL itself is unusable; no other route will help.
    pub fn is_policy(&self) -> bool {
        matches!(self, FetchError::InvalidUrl(_) | FetchError::Blocked(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchRoute {
    Origin,
    Mirror,
}

impl Display for FetchRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchRoute::Origin => write!(f, "origin"),
            FetchRoute::Mirror => write!(f, "mirror"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,
    /// URL relative links should be resolved against (after redirects for the origin).
    pub final_url: String,
    pub route: FetchRoute,
}

fn is_ip_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

fn is_private_ip(host: &str) -> bool {
    use std::net::ToSocketAddrs;

    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_ip_private(&ip);
    }

    if let Ok(addrs) = (host, 80).to_socket_addrs() {
        for addr in addrs {
            if is_ip_private(&addr.ip()) {
                return true;
            }
        }
    }

    false
}

fn validate_url_policy(url_parsed: &Url, config: &ScrapeConfig) -> Result<(), FetchError> {
    if !config.allowed_schemes.iter().any(|s| s == url_parsed.scheme()) {
        return Err(FetchError::Blocked(format!(
            "scheme '{}' not allowed",
            url_parsed.scheme()
        )));
    }

    let host = url_parsed.host_str().unwrap_or_default();
    if host.is_empty() {
        return Err(FetchError::InvalidUrl(format!("{url_parsed}: missing host")));
    }

    if config.blocked_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        return Err(FetchError::Blocked(format!("host '{host}' is blocked")));
    }

    if config.block_private_ips && is_private_ip(host) {
        return Err(FetchError::Blocked(format!(
            "host '{host}' resolves to a private address"
        )));
    }

    Ok(())
}

/// Follow at most `MAX_REDIRECTS` hops, and only to targets the URL policy allows.
fn redirect_policy(config: &ScrapeConfig) -> redirect::Policy {
    let config = config.clone();
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match validate_url_policy(attempt.url(), &config) {
            Ok(()) => attempt.follow(),
            Err(err) => attempt.error(err),
        }
    })
}

/// The policy violation behind a refused redirect, if that is what failed.
fn redirect_violation(error: &reqwest::Error) -> Option<FetchError> {
    if !error.is_redirect() {
        return None;
    }
    let mut source = error.source();
    while let Some(err) = source {
        match err.downcast_ref::<FetchError>() {
            Some(FetchError::Blocked(msg)) => {
                return Some(FetchError::Blocked(format!("redirect: {msg}")))
            }
            Some(FetchError::InvalidUrl(msg)) => {
                return Some(FetchError::InvalidUrl(format!("redirect: {msg}")))
            }
            _ => source = err.source(),
        }
    }
    None
}

/// Map a request error, keeping redirect policy violations as policy errors.
fn request_error(error: &reqwest::Error) -> FetchError {
    redirect_violation(error).unwrap_or_else(|| FetchError::Request(get_error(error)))
}

fn get_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "timed out".to_string();
    }
    match error.source() {
        Some(e) => match e.source() {
            Some(e) => e.to_string(),
            None => e.to_string(),
        },
        None => error.to_string(),
    }
}

/// Fill a service template: `{url}` gets the raw target, `{url_encoded}` the percent-encoded one.
pub fn service_url(template: &str, target: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    template
        .replace("{url_encoded}", &encoded)
        .replace("{url}", target)
}

/// Parse `url` and check it against the URL policy.
pub fn check_url(url: &str, config: &ScrapeConfig) -> Result<Url, FetchError> {
    let mut url = url.trim().to_string();

    if url.starts_with("//") {
        url = format!("https:{}", url);
    }

    let url_parsed =
        Url::parse(&url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    validate_url_policy(&url_parsed, config)?;

    Ok(url_parsed)
}

/// Blocking page fetcher: origin first, mirror proxy second.
pub struct HtmlFetcher {
    config: ScrapeConfig,
    client: Client,
    proxy_client: Option<Client>,
}

impl HtmlFetcher {
    pub fn new(config: ScrapeConfig) -> anyhow::Result<Self> {
        let client = Self::client_builder(&config).build()?;

        let proxy_client = match config.proxy.as_deref() {
            Some(proxy) => Some(
                Self::client_builder(&config)
                    .proxy(reqwest::Proxy::all(proxy)?)
                    .build()?,
            ),
            None => None,
        };

        Ok(Self {
            config,
            client,
            proxy_client,
        })
    }

    fn client_builder(config: &ScrapeConfig) -> reqwest::blocking::ClientBuilder {
        Client::builder()
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .redirect(redirect_policy(config))
            .pool_idle_timeout(Duration::from_secs(10))
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Origin, then the mirror proxy if the origin failed or returned too little.
    pub fn fetch_html(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let origin_err = match self.fetch_origin(url) {
            Ok(page) => return Ok(page),
            Err(err) if err.is_policy() => return Err(err),
            Err(err) => err,
        };

        log::info!("{url}: origin fetch failed ({origin_err}), trying mirror");

        self.fetch_mirror(url)
            .map_err(|mirror_err| FetchError::Exhausted {
                origin: Box::new(origin_err),
                mirror: Box::new(mirror_err),
            })
    }

    pub fn fetch_origin(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let url_parsed = check_url(url, &self.config)?;
        let iden = format!(
            "{}{}",
            url_parsed.host_str().unwrap_or_default(),
            url_parsed.path()
        );
        let timeout = Duration::from_secs(self.config.origin_timeout_secs);

        log::debug!("{iden}: requesting");

        let resp = match self.get_html(&self.client, url_parsed.clone(), timeout) {
            Ok(resp) => resp,
            Err(err) if redirect_violation(&err).is_some() => return Err(request_error(&err)),
            Err(err) => match &self.proxy_client {
                // network errors get one more try through the proxy
                Some(proxy_client) => {
                    log::debug!("{iden}: {}, retrying through proxy", get_error(&err));
                    self.get_html(proxy_client, url_parsed.clone(), timeout)
                        .map_err(|err| request_error(&err))?
                }
                None => return Err(FetchError::Request(get_error(&err))),
            },
        };

        let final_url = resp.url().to_string();
        let html = self.read_html(&iden, resp)?;

        Ok(FetchedPage {
            html,
            final_url,
            route: FetchRoute::Origin,
        })
    }

    pub fn fetch_mirror(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let url_parsed = check_url(url, &self.config)?;
        let mirror_url = service_url(&self.config.mirror_url, url_parsed.as_str());
        let mirror_parsed = Url::parse(&mirror_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{mirror_url}: {e}")))?;
        let iden = format!("mirror:{}", url_parsed.host_str().unwrap_or_default());

        log::debug!("{iden}: requesting {mirror_url}");

        let resp = self
            .client
            .get(mirror_parsed)
            .header(ACCEPT, ACCEPT_HTML)
            .header("X-Return-Format", "html")
            .timeout(Duration::from_secs(self.config.mirror_timeout_secs))
            .send()
            .map_err(|err| FetchError::Request(get_error(&err)))?;

        let html = self.read_html(&iden, resp)?;

        Ok(FetchedPage {
            html,
            final_url: url_parsed.to_string(),
            route: FetchRoute::Mirror,
        })
    }

    /// GET raw bytes, e.g. an image to classify.
    pub fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let url_parsed = check_url(url, &self.config)?;

        let resp = self
            .client
            .get(url_parsed)
            .timeout(timeout)
            .send()
            .map_err(|err| request_error(&err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        resp.bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::Request(get_error(&err)))
    }

    fn get_html(
        &self,
        client: &Client,
        url: Url,
        timeout: Duration,
    ) -> reqwest::Result<reqwest::blocking::Response> {
        client
            .get(url)
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, self.config.accept_language.as_str())
            .timeout(timeout)
            .send()
    }

    fn read_html(
        &self,
        iden: &str,
        resp: reqwest::blocking::Response,
    ) -> Result<String, FetchError> {
        let status = resp.status();
        if !status.is_success() {
            log::debug!("{iden}: {status}");
            return Err(FetchError::Status(status.as_u16()));
        }

        // we might get OK, but no usable body
        let bytes = resp
            .bytes()
            .map_err(|err| FetchError::Request(get_error(&err)))?;
        let html = String::from_utf8_lossy(&bytes).to_string();

        let len = html.trim().len();
        if len < self.config.min_html_bytes {
            log::debug!("{iden}: body too short ({len} bytes)");
            return Err(FetchError::TooShort(len));
        }

        Ok(html)
    }
}
