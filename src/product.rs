use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title used when a page exposes no usable title at all.
pub const PLACEHOLDER_TITLE: &str = "商品";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductSource {
    #[default]
    Auto,
    Manual,
    Screenshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub url: String,
    pub title: String,
    pub image: Option<String>,
    pub price: Option<String>,
    #[serde(default)]
    pub source: ProductSource,
    pub fetched_at: DateTime<Utc>,
}

/// Raw extractor output, before any defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub title: Option<String>,
    pub image: Option<String>,
    pub price: Option<String>,
}

impl Extraction {
    /// Title with the placeholder applied.
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(PLACEHOLDER_TITLE)
    }

    pub fn is_complete(&self) -> bool {
        self.title.is_some() && self.image.is_some()
    }

    /// Fill only missing fields from `overlay`. Never overwrites existing values.
    pub fn merge(mut self, overlay: Extraction) -> Extraction {
        if self.title.is_none() {
            self.title = overlay.title;
        }
        if self.image.is_none() {
            self.image = overlay.image;
        }
        if self.price.is_none() {
            self.price = overlay.price;
        }
        self
    }

    /// Describe which fields are present (for logging)
    pub fn describe_fields(&self) -> String {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.image.is_some() {
            fields.push("image");
        }
        if self.price.is_some() {
            fields.push("price");
        }
        fields.join(",")
    }
}

impl Product {
    pub fn from_extraction(url: &str, extraction: Extraction, source: ProductSource) -> Self {
        Product {
            url: url.to_string(),
            title: extraction.title().to_string(),
            image: extraction.image,
            price: extraction.price,
            source,
            fetched_at: Utc::now(),
        }
    }
}
