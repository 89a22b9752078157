// src/main.rs
//! Local Override Engine
//!
//! Resolves network URLs to their location in the override tree:
//!
//! ```text
//! override-engine https://example.com/app.js?v=2
//! ```

use anyhow::{bail, Result};
use override_engine::codec::raw_path_to_encoded_path;
use override_engine::observability::init_tracing;
use override_engine::utils::config::EngineConfig;
use override_engine::PathCodec;
use tracing::{debug, info};

fn main() -> Result<()> {
    // Load configuration
    let config = EngineConfig::load()?;
    init_tracing(&config.observability)?;

    info!("Local Override Engine v{}", override_engine::VERSION);
    debug!("Configuration loaded: {:?}", config);

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        bail!("usage: override-engine <url>...");
    }

    let root = config.overrides.root.trim_end_matches('/');
    let codec = PathCodec::new(
        config.overrides.file_name_policy(),
        config.overrides.long_path_budget,
    );
    for url in &urls {
        let raw = codec.raw_path(root, url);
        println!("{}", url);
        println!("  raw:     {}", raw);
        println!("  encoded: {}", raw_path_to_encoded_path(&raw));
        println!("  file:    {}", codec.file_url(root, url));
    }

    Ok(())
}
