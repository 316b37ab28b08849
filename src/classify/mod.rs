//! Fashion category classification for outfit photos.
//!
//! Three backends are available: the Hugging Face inference API, an OpenAI vision model,
//! and a deterministic mock. A backend that fails at runtime degrades to the mock so callers
//! always get a category back.

pub mod huggingface;
pub mod labels;
pub mod mock;
pub mod openai;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display, sync::Arc, time::Duration};

use crate::{
    app::AppError,
    config::ClassifyConfig,
    scrape::{check_url, HtmlFetcher},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Casual,
    Smart,
    Feminine,
    Mode,
    Outdoor,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Casual,
        Category::Smart,
        Category::Feminine,
        Category::Mode,
        Category::Outdoor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Casual => "casual",
            Category::Smart => "smart",
            Category::Feminine => "feminine",
            Category::Mode => "mode",
            Category::Outdoor => "outdoor",
        }
    }

    /// Display label shown to users.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Casual => "カジュアル",
            Category::Smart => "スマート",
            Category::Feminine => "フェミニン",
            Category::Mode => "モード",
            Category::Outdoor => "アウトドア",
        }
    }

    /// Accepts the English name or the display label, case-insensitive.
    pub fn from_name(name: &str) -> Option<Category> {
        let name = name.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name) || c.label() == name)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum Backend {
    #[default]
    #[serde(rename = "hf")]
    #[value(name = "hf")]
    HuggingFace,

    #[serde(rename = "openai")]
    #[value(name = "openai")]
    OpenAi,

    #[serde(rename = "mock")]
    #[value(name = "mock")]
    Mock,
}

impl Backend {
    pub fn parse(mode: &str) -> Option<Backend> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "hf" | "huggingface" => Some(Backend::HuggingFace),
            "openai" => Some(Backend::OpenAi),
            "mock" => Some(Backend::Mock),
            _ => None,
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::HuggingFace => write!(f, "hf"),
            Backend::OpenAi => write!(f, "openai"),
            Backend::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub category: Category,

    /// Backend that actually produced the result.
    pub mode: Backend,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub scores: BTreeMap<Category, f32>,

    /// Raw backend labels, best first.
    pub labels: Vec<LabelScore>,

    /// Set when the requested backend failed and the mock answered instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl Classification {
    /// Up to `n` categories by descending score.
    pub fn top(&self, n: usize) -> Vec<(Category, f32)> {
        let mut ranked: Vec<(Category, f32)> =
            self.scores.iter().map(|(c, s)| (*c, *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

pub struct Classifier {
    config: ClassifyConfig,
    fetcher: Arc<HtmlFetcher>,
    client: Client,
}

impl Classifier {
    pub fn new(config: ClassifyConfig, fetcher: Arc<HtmlFetcher>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            config,
            fetcher,
            client,
        })
    }

    /// Classify the image at `image_url` with `backend`, or the configured default.
    pub fn classify(
        &self,
        image_url: &str,
        backend: Option<Backend>,
    ) -> Result<Classification, AppError> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(AppError::BadRequest("imageUrl is required".to_string()));
        }

        let backend = backend.unwrap_or(self.config.backend);

        if backend != Backend::Mock {
            check_url(image_url, self.fetcher.config())
                .map_err(|err| AppError::BadRequest(err.to_string()))?;
        }

        let result = match backend {
            Backend::HuggingFace => {
                huggingface::classify(&self.config, &self.client, &self.fetcher, image_url)
            }
            Backend::OpenAi => openai::classify(&self.config, &self.client, image_url),
            Backend::Mock => return Ok(mock::classify(image_url)),
        };

        match result {
            Ok(classification) => {
                log::info!(
                    "{image_url}: {backend} -> {}",
                    classification.category
                );
                Ok(classification)
            }
            Err(err) => {
                log::warn!("{image_url}: {backend} failed ({err:#}), using mock");
                let mut classification = mock::classify(image_url);
                classification.fallback_reason = Some(format!("{backend}: {err:#}"));
                Ok(classification)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_names() {
        assert_eq!(Category::from_name("Casual"), Some(Category::Casual));
        assert_eq!(Category::from_name("スマート"), Some(Category::Smart));
        assert_eq!(Category::Smart.label(), "スマート");
        assert_eq!(Category::from_name(" OUTDOOR "), Some(Category::Outdoor));
        assert_eq!(Category::from_name("street"), None);
        assert_eq!(
            serde_json::to_string(&Category::Feminine).unwrap(),
            r#""feminine""#
        );
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("hf"), Some(Backend::HuggingFace));
        assert_eq!(Backend::parse("OpenAI"), Some(Backend::OpenAi));
        assert_eq!(Backend::parse("mock"), Some(Backend::Mock));
        assert_eq!(Backend::parse("gpt"), None);
        assert_eq!(serde_json::to_string(&Backend::HuggingFace).unwrap(), r#""hf""#);
        assert_eq!(Backend::default(), Backend::HuggingFace);
    }

    #[test]
    fn test_top_categories() {
        let classification = mock::classify("ab");
        let top = classification.top(3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].0, Category::Mode);
        assert!(top[0].1 >= top[1].1 && top[1].1 >= top[2].1);
    }
}
