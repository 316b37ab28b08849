use anyhow::Result;
use std::sync::Arc;

use crate::{
    classify::Classifier,
    config::Config,
    resolver::{ProductCache, Resolver},
    scrape::HtmlFetcher,
    supabase::SupabaseClient,
};

/// Everything a request handler needs, built once from [`Config`].
///
/// Holds blocking HTTP clients, so it must be created outside of an async context.
pub struct AppContext {
    config: Config,
    resolver: Resolver,
    classifier: Classifier,
    supabase: Option<Arc<SupabaseClient>>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let supabase = SupabaseClient::new(&config.supabase)?.map(Arc::new);
        let cache = Self::product_cache(&config, supabase.as_ref());
        Self::with_cache(config, supabase, cache)
    }

    /// Like [`AppContext::new`], with an explicit product cache.
    pub fn with_cache(
        config: Config,
        supabase: Option<Arc<SupabaseClient>>,
        cache: Option<Arc<dyn ProductCache>>,
    ) -> Result<Self> {
        let fetcher = Arc::new(HtmlFetcher::new(config.scrape.clone())?);
        let resolver = Resolver::new(fetcher.clone(), cache);
        let classifier = Classifier::new(config.classify.clone(), fetcher)?;

        log::debug!(
            "context ready (classifier: {}, supabase: {})",
            config.classify.backend,
            if supabase.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            resolver,
            classifier,
            supabase,
        })
    }

    fn product_cache(
        config: &Config,
        supabase: Option<&Arc<SupabaseClient>>,
    ) -> Option<Arc<dyn ProductCache>> {
        if !config.supabase.cache_products {
            return None;
        }
        supabase.map(|client| client.clone() as Arc<dyn ProductCache>)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn supabase(&self) -> Option<&SupabaseClient> {
        self.supabase.as_deref()
    }
}
