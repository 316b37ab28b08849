use crate::classify::Backend;
use anyhow::{bail, Context, Result};
use homedir::my_home;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

const USER_AGENT_DEFAULT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE_DEFAULT: &str = "ja,en-US;q=0.9,en;q=0.8";
const ORIGIN_TIMEOUT_SECS: u64 = 12;
const MIRROR_TIMEOUT_SECS: u64 = 22;
const MIN_HTML_BYTES: usize = 200;
const MIRROR_URL_DEFAULT: &str = "https://r.jina.ai/{url}";
const SCREENSHOT_URL_DEFAULT: &str = "https://image.thum.io/get/width/1200/crop/900/{url}";

const HF_MODEL_DEFAULT: &str = "microsoft/resnet-50";
const HF_BASE_URL_DEFAULT: &str = "https://api-inference.huggingface.co";
const OPENAI_MODEL_DEFAULT: &str = "gpt-4o-mini";
const OPENAI_BASE_URL_DEFAULT: &str = "https://api.openai.com";

/// Outbound scraping: timeouts, mirror/screenshot services and the URL policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    #[serde(default = "default_origin_timeout_secs")]
    pub origin_timeout_secs: u64,

    #[serde(default = "default_mirror_timeout_secs")]
    pub mirror_timeout_secs: u64,

    /// Bodies shorter than this are treated as a failed fetch.
    #[serde(default = "default_min_html_bytes")]
    pub min_html_bytes: usize,

    /// Mirror proxy template. `{url}` is replaced with the target, `{url_encoded}` with it percent-encoded.
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,

    /// Screenshot service template, same placeholders as `mirror_url`.
    #[serde(default = "default_screenshot_url")]
    pub screenshot_url: String,

    /// Fetch the mirror as well when the origin page lacks an image or title.
    #[serde(default = "default_true")]
    pub merge_mirror: bool,

    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,

    #[serde(default)]
    pub blocked_hosts: Vec<String>,

    #[serde(default = "default_true")]
    pub block_private_ips: bool,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Proxy for a second origin attempt after a network error (env `OPT_PROXY`).
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            origin_timeout_secs: ORIGIN_TIMEOUT_SECS,
            mirror_timeout_secs: MIRROR_TIMEOUT_SECS,
            min_html_bytes: MIN_HTML_BYTES,
            mirror_url: default_mirror_url(),
            screenshot_url: default_screenshot_url(),
            merge_mirror: true,
            allowed_schemes: default_allowed_schemes(),
            blocked_hosts: Vec::new(),
            block_private_ips: true,
            accept_invalid_certs: false,
            proxy: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifyConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_hf_model")]
    pub hf_model: String,

    #[serde(default = "default_hf_base_url")]
    pub hf_base_url: String,

    #[serde(skip)]
    pub hf_token: Option<String>,

    /// Timeout for a single inference attempt.
    #[serde(default = "default_hf_timeout_secs")]
    pub hf_timeout_secs: u64,

    /// Retries on 503/504 or "model is loading" answers.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(skip)]
    pub openai_api_key: Option<String>,

    #[serde(default = "default_openai_timeout_secs")]
    pub openai_timeout_secs: u64,

    /// Timeout for downloading the image to classify.
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            hf_model: default_hf_model(),
            hf_base_url: default_hf_base_url(),
            hf_token: None,
            hf_timeout_secs: default_hf_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            openai_model: default_openai_model(),
            openai_base_url: default_openai_base_url(),
            openai_api_key: None,
            openai_timeout_secs: default_openai_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL (env `SUPABASE_URL`). Supabase features are off when unset.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(skip)]
    pub service_role_key: Option<String>,

    #[serde(default = "default_products_table")]
    pub products_table: String,

    #[serde(default = "default_posts_table")]
    pub posts_table: String,

    #[serde(default = "default_uploads_bucket")]
    pub uploads_bucket: String,

    /// Read and upsert resolved products keyed by URL.
    #[serde(default = "default_true")]
    pub cache_products: bool,

    #[serde(default = "default_supabase_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_role_key: None,
            products_table: default_products_table(),
            posts_table: default_posts_table(),
            uploads_bucket: default_uploads_bucket(),
            cache_products: true,
            timeout_secs: default_supabase_timeout_secs(),
        }
    }
}

impl SupabaseConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.service_role_key.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Reported by the health endpoint (env `VERCEL_REGION` or `REGION`).
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(default)]
    pub classify: ClassifyConfig,

    #[serde(default)]
    pub supabase: SupabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            region: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            scrape: ScrapeConfig::default(),
            classify: ClassifyConfig::default(),
            supabase: SupabaseConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_user_agent() -> String {
    USER_AGENT_DEFAULT.to_string()
}

fn default_accept_language() -> String {
    ACCEPT_LANGUAGE_DEFAULT.to_string()
}

fn default_origin_timeout_secs() -> u64 {
    ORIGIN_TIMEOUT_SECS
}

fn default_mirror_timeout_secs() -> u64 {
    MIRROR_TIMEOUT_SECS
}

fn default_min_html_bytes() -> usize {
    MIN_HTML_BYTES
}

fn default_mirror_url() -> String {
    MIRROR_URL_DEFAULT.to_string()
}

fn default_screenshot_url() -> String {
    SCREENSHOT_URL_DEFAULT.to_string()
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_hf_model() -> String {
    HF_MODEL_DEFAULT.to_string()
}

fn default_hf_base_url() -> String {
    HF_BASE_URL_DEFAULT.to_string()
}

fn default_hf_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    800
}

fn default_backoff_cap_ms() -> u64 {
    5_000
}

fn default_openai_model() -> String {
    OPENAI_MODEL_DEFAULT.to_string()
}

fn default_openai_base_url() -> String {
    OPENAI_BASE_URL_DEFAULT.to_string()
}

fn default_openai_timeout_secs() -> u64 {
    30
}

fn default_image_timeout_secs() -> u64 {
    20
}

fn default_products_table() -> String {
    "products".to_string()
}

fn default_posts_table() -> String {
    "posts".to_string()
}

fn default_uploads_bucket() -> String {
    "uploads".to_string()
}

fn default_supabase_timeout_secs() -> u64 {
    10
}

impl Config {
    /// `~/.config/shopsnap/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        match my_home() {
            Ok(Some(home)) => Some(home.join(".config").join("shopsnap").join("config.yaml")),
            _ => None,
        }
    }

    /// Load from `path`, `SHOPSNAP_CONFIG` or the default path, whichever is given first.
    /// A missing file means defaults. Environment overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("SHOPSNAP_CONFIG").ok().map(PathBuf::from))
            .or_else(Self::default_path);

        let mut config = match path {
            Some(ref path) if path.exists() => {
                log::debug!("loading config from {}", path.display());
                Self::load_with(path)?
            }
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn load_with(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;

        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yml::from_str(&config_str)
            .with_context(|| format!("config {} is malformed", path.display()))
    }

    /// Secrets and deployment values always come from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(addr) = lookup("SHOPSNAP_ADDR") {
            self.addr = addr;
        }
        if let Some(region) = lookup("VERCEL_REGION").or_else(|| lookup("REGION")) {
            self.region = Some(region);
        }
        if let Some(proxy) = lookup("OPT_PROXY") {
            self.scrape.proxy = Some(proxy);
        }
        if let Some(token) = lookup("HF_TOKEN") {
            self.classify.hf_token = Some(token);
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.classify.openai_api_key = Some(key);
        }
        if let Some(url) = lookup("SUPABASE_URL") {
            self.supabase.url = Some(url);
        }
        if let Some(key) = lookup("SUPABASE_SERVICE_ROLE_KEY") {
            self.supabase.service_role_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let scrape = &self.scrape;

        if scrape.origin_timeout_secs == 0 || scrape.mirror_timeout_secs == 0 {
            bail!("scrape timeouts must be greater than 0");
        }

        for (name, template) in [
            ("mirror_url", &scrape.mirror_url),
            ("screenshot_url", &scrape.screenshot_url),
        ] {
            if !template.contains("{url}") && !template.contains("{url_encoded}") {
                bail!("scrape.{name} must contain {{url}} or {{url_encoded}}, got '{template}'");
            }
        }

        if scrape.allowed_schemes.is_empty() {
            bail!("scrape.allowed_schemes must not be empty");
        }

        if self.classify.hf_timeout_secs == 0 || self.classify.openai_timeout_secs == 0 {
            bail!("classify timeouts must be greater than 0");
        }

        if self.classify.backoff_cap_ms < self.classify.backoff_base_ms {
            bail!(
                "classify.backoff_cap_ms ({}) must not be lower than backoff_base_ms ({})",
                self.classify.backoff_cap_ms,
                self.classify.backoff_base_ms
            );
        }

        if let Some(url) = &self.supabase.url {
            if url::Url::parse(url).is_err() {
                bail!("supabase.url is not a valid URL: '{url}'");
            }
        }

        Ok(())
    }
}
