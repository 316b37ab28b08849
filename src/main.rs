use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod classify;
mod cli;
mod config;
mod extract;
mod product;
mod resolver;
mod scrape;
mod screenshot;
mod supabase;
#[cfg(test)]
mod tests;
mod upload;
mod web;

use app::AppContext;
use config::Config;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let mut config = Config::load(args.config.as_deref())?;

    match args.command {
        cli::Command::Serve { addr } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }

            // blocking clients must be created outside the runtime
            let ctx = AppContext::new(config)?;
            web::start_daemon(ctx)?;
        }

        cli::Command::Resolve { url, no_cache } => {
            if no_cache {
                config.supabase.cache_products = false;
            }

            let ctx = AppContext::new(config)?;
            let product = ctx.resolver().resolve(&url)?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }

        cli::Command::Classify { image_url, mode } => {
            let ctx = AppContext::new(config)?;
            let classification = ctx.classifier().classify(&image_url, mode)?;
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
    }

    Ok(())
}
