//! Weft server - main entry point

use std::path::PathBuf;

use anyhow::Result;

use weft_common::{init_tracing, WeftConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::var_os("WEFT_CONFIG").map(PathBuf::from);
    let config = WeftConfig::load(config_path.as_deref())?;

    weft_api::serve(&config).await
}
