//! Minimal Supabase REST and Storage client.

use chrono::{DateTime, Utc};
use reqwest::{
    blocking::{Client, RequestBuilder, Response},
    header::CONTENT_TYPE,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::{
    config::SupabaseConfig,
    product::{Product, ProductSource, PLACEHOLDER_TITLE},
    resolver::ProductCache,
};

#[derive(thiserror::Error, Debug)]
pub enum SupabaseError {
    #[error("supabase request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("supabase returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("post {0} not found")]
    PostNotFound(String),
}

/// Products table row. Extra columns are ignored and missing ones get defaults.
#[derive(Debug, Deserialize)]
struct ProductRow {
    url: String,
    title: Option<String>,
    image: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    price: Option<String>,
    source: Option<ProductSource>,
    fetched_at: Option<DateTime<Utc>>,
}

/// `price` may be a text or a numeric column.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            url: row.url,
            title: row
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            image: row.image,
            price: row.price,
            source: row.source.unwrap_or_default(),
            fetched_at: row.fetched_at.unwrap_or_else(Utc::now),
        }
    }
}

pub struct SupabaseClient {
    base_url: String,
    key: String,
    config: SupabaseConfig,
    client: Client,
}

impl SupabaseClient {
    /// `None` when the URL or the service key is missing.
    pub fn new(config: &SupabaseConfig) -> anyhow::Result<Option<Self>> {
        let (Some(url), Some(key)) = (&config.url, &config.service_role_key) else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Some(Self {
            base_url: url.trim_end_matches('/').to_string(),
            key: key.clone(),
            config: config.clone(),
            client,
        }))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn check(resp: Response) -> Result<Response, SupabaseError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                ["message", "error", "msg"]
                    .iter()
                    .find_map(|k| v.get(k).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or(body);

        Err(SupabaseError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub fn get_product(&self, url: &str) -> Result<Option<Product>, SupabaseError> {
        let resp = self
            .authed(self.client.get(self.rest_url(&self.config.products_table)))
            .query(&[
                ("url", format!("eq.{url}")),
                ("select", "*".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()?;

        let rows: Vec<ProductRow> = Self::check(resp)?.json()?;
        Ok(rows.into_iter().next().map(Product::from))
    }

    /// Insert or merge on the `url` unique key.
    pub fn upsert_product(&self, product: &Product) -> Result<(), SupabaseError> {
        let resp = self
            .authed(self.client.post(self.rest_url(&self.config.products_table)))
            .query(&[("on_conflict", "url")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(product)
            .send()?;

        Self::check(resp)?;
        Ok(())
    }

    /// Attach `selected` to post `post_id`.
    pub fn select_product(&self, post_id: &str, selected: &Value) -> Result<(), SupabaseError> {
        let resp = self
            .authed(self.client.patch(self.rest_url(&self.config.posts_table)))
            .query(&[("id", format!("eq.{post_id}"))])
            .header("Prefer", "return=representation")
            .json(&json!({ "selected_product": selected }))
            .send()?;

        let rows: Vec<Value> = Self::check(resp)?.json()?;
        if rows.is_empty() {
            return Err(SupabaseError::PostNotFound(post_id.to_string()));
        }

        Ok(())
    }

    pub fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), SupabaseError> {
        let url = format!("{}/storage/v1/object/{bucket}/{key}", self.base_url);

        let resp = self
            .authed(self.client.post(url))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .header("cache-control", "3600")
            .body(bytes)
            .send()?;

        Self::check(resp)?;
        Ok(())
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{key}", self.base_url)
    }
}

impl ProductCache for SupabaseClient {
    fn get(&self, url: &str) -> anyhow::Result<Option<Product>> {
        Ok(self.get_product(url)?)
    }

    fn put(&self, product: &Product) -> anyhow::Result<()> {
        Ok(self.upsert_product(product)?)
    }
}
