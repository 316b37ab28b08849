use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::classify::Backend;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML config file.
    /// Defaults to $SHOPSNAP_CONFIG or ~/.config/shopsnap/config.yaml
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP API server
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:8080
        #[clap(long)]
        addr: Option<String>,
    },

    /// Resolve a product page and print it as JSON
    Resolve {
        /// Product page URL
        url: String,

        /// Skip the product cache
        #[clap(long, default_value = "false")]
        no_cache: bool,
    },

    /// Classify an outfit image and print the result as JSON
    Classify {
        /// Image URL
        image_url: String,

        /// Classifier backend, defaults to `classify.backend` from the config
        #[clap(long, value_enum)]
        mode: Option<Backend>,
    },
}
