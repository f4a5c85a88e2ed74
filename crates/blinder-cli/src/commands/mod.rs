//! CLI command implementations.

pub mod elemhide;
pub mod eval;
pub mod matches;

pub use elemhide::ElemhideCommand;
pub use eval::EvalCommand;
pub use matches::MatchesCommand;

use std::sync::Arc;

use anyhow::Result;
use blinder_platform::{
    DirectoryResources, FilterEngine, FilterEngineParams, Platform, PlatformConfig,
};

use crate::config::Config;

/// A platform reading bootstrap sources from the configured directory.
pub fn build_platform(config: &Config) -> Result<Platform> {
    let resource_dir = config.resource_dir();
    tracing::debug!(dir = %resource_dir.display(), "using resource directory");
    let platform_config = PlatformConfig {
        base_path: resource_dir.clone(),
        ..config.platform.clone()
    };
    let platform = Platform::builder()
        .config(platform_config)
        .resources(Arc::new(DirectoryResources::new(resource_dir)))
        .build()?;
    platform.set_up(config.app.clone())?;
    Ok(platform)
}

/// Request construction with the configured preferences and wait for it.
pub async fn filter_engine(platform: &Platform, config: &Config) -> Result<Arc<FilterEngine>> {
    let params = FilterEngineParams {
        preconfigured_prefs: config.prefs.clone(),
    };
    platform.create_filter_engine_async(params, None);
    Ok(platform.wait_filter_engine().await?)
}
