//! Config and .env loading for the CLI

use std::path::{Path, PathBuf};

use anyhow::Result;
use tribes_db::StoreConfig;

/// Load .env files and return the ones that were read.
///
/// Runs before logging is set up, so callers log the result.
/// Priority order (highest to lowest):
/// 1. Variables already in the environment
/// 2. Current directory .env
/// 3. ~/.tribes/.env
pub fn load_dotenv() -> Vec<PathBuf> {
    let mut loaded = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded.push(path);
    }

    if let Some(env_file) = dirs::home_dir().map(|home| home.join(".tribes").join(".env")) {
        if env_file.exists() && dotenvy::from_path(&env_file).is_ok() {
            loaded.push(env_file);
        }
    }

    loaded
}

/// Explicit path (flag or TRIBES_CONFIG) must exist; the default path may not.
pub fn load(path: Option<&Path>) -> Result<StoreConfig> {
    match path {
        Some(path) => {
            let mut config = StoreConfig::from_file(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => StoreConfig::load(),
    }
}
