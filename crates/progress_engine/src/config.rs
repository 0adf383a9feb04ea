use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

pub const STORE_DIR_ENV_VAR: &str = "EPISODE_STORE_DIR";
pub const SAVE_DEBOUNCE_ENV_VAR: &str = "EPISODE_SAVE_DEBOUNCE_MS";
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(100);
const DEFAULT_STORE_DIR: &str = "saves";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Saves arriving within this window of the previous save coalesce into
    /// one write carrying the last payload.
    pub save_debounce: Duration,
    pub store_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            store_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            save_debounce: resolve_save_debounce(defaults.save_debounce),
            store_dir: env::var_os(STORE_DIR_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Directory backing a [`crate::FileStore`]; created if missing.
pub fn resolve_store_dir(config: &EngineConfig) -> Result<PathBuf, ConfigError> {
    let dir = match &config.store_dir {
        Some(dir) => dir.clone(),
        None => match env::var(STORE_DIR_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            Ok(_) | Err(env::VarError::NotPresent) => PathBuf::from(DEFAULT_STORE_DIR),
            Err(source) => {
                return Err(ConfigError::EnvVar {
                    var: STORE_DIR_ENV_VAR,
                    source,
                })
            }
        },
    };

    fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateStoreDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

fn resolve_save_debounce(fallback: Duration) -> Duration {
    match env::var(SAVE_DEBOUNCE_ENV_VAR) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!(
                    env_var = SAVE_DEBOUNCE_ENV_VAR,
                    value = value.as_str(),
                    "invalid save-debounce env var value; falling back to default"
                );
                fallback
            }
        },
        Err(env::VarError::NotPresent) => fallback,
        Err(err) => {
            warn!(
                env_var = SAVE_DEBOUNCE_ENV_VAR,
                error = %err,
                "unable to read save-debounce env var; falling back to default"
            );
            fallback
        }
    }
}
