use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Format as _, Serialized, Toml},
    value::Value,
};

use crate::config::defaults::CONFIG_FILE_NAME;
use crate::config::env::{EnvMap, config_key, is_legacy_mode_flag, load_dotenv, merge_env};
use crate::config::paths::{env_file, find_repo_root};
use crate::config::settings::Settings;
use crate::config::{DevMode, PlugdevConfig, ValidateMode};
use crate::error::ConfigError;

/// Values given on the command line. Only `Some` fields override.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<DevMode>,
    pub lazy_window: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upload: Option<bool>,
    pub validate: Option<ValidateMode>,
    pub quiet: Option<bool>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(mode) = self.mode {
            figment = figment.merge(Serialized::default("dev.mode", mode));
        }
        if let Some(window) = &self.lazy_window {
            figment = figment.merge(Serialized::default("dev.lazy_window", window));
        }
        if let Some(host) = &self.host {
            figment = figment.merge(Serialized::default("dev.host", host));
        }
        if let Some(port) = self.port {
            figment = figment.merge(Serialized::default("dev.port", port));
        }
        if let Some(upload) = self.upload {
            figment = figment.merge(Serialized::default("upload.enabled", upload));
        }
        if let Some(validate) = self.validate {
            figment = figment.merge(Serialized::default("manifest.validate", validate));
        }
        if let Some(quiet) = self.quiet {
            figment = figment.merge(Serialized::default("log.quiet", quiet));
        }
        figment
    }
}

/// Inputs to [`PlugdevConfig::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Directory the search for the repository root starts from
    pub cwd: PathBuf,
    /// Explicit `--config` file
    pub config_path: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    /// Process environment snapshot
    pub env: EnvMap,
}

impl LoadOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            config_path: None,
            overrides: ConfigOverrides::default(),
            env: EnvMap::new(),
        }
    }
}

/// Result of loading: the raw config and its resolved form.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PlugdevConfig,
    pub settings: Settings,
    pub config_file: Option<PathBuf>,
    /// `.env` merged under the process environment
    pub env: EnvMap,
}

impl PlugdevConfig {
    /// Load configuration from every source.
    /// Priority: CLI args > process env > .env > plugdev.toml > defaults
    pub fn load(options: &LoadOptions) -> Result<LoadedConfig, ConfigError> {
        let repo_root = find_repo_root(&options.cwd);

        let config_file = match &options.config_path {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    options.cwd.join(path)
                };
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                Some(path)
            }
            None => {
                let default_path = repo_root.join(CONFIG_FILE_NAME);
                default_path.exists().then_some(default_path)
            }
        };

        let dotenv = load_dotenv(&env_file(&repo_root))?;
        let env = merge_env(dotenv, options.env.clone());

        let mut figment = Figment::new().merge(Serialized::defaults(PlugdevConfig::default()));
        if let Some(path) = &config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment = merge_env_vars(figment, &env);
        figment = options.overrides.apply(figment);

        let config: PlugdevConfig = figment.extract().map_err(figment_error)?;
        let settings = Settings::resolve(&config, &repo_root, &env)?;

        Ok(LoadedConfig {
            config,
            settings,
            config_file,
            env,
        })
    }
}

fn merge_env_vars(mut figment: Figment, env: &EnvMap) -> Figment {
    for (name, raw) in env {
        if is_legacy_mode_flag(name, raw) {
            continue;
        }
        let Some(key) = config_key(name) else {
            continue;
        };
        let value = raw
            .parse::<Value>()
            .unwrap_or_else(|_| Value::from(raw.clone()));
        figment = figment.merge(Serialized::default(&key, value));
    }
    figment
}

fn figment_error(err: figment::Error) -> ConfigError {
    let field = if err.path.is_empty() {
        "configuration".to_string()
    } else {
        err.path.join(".")
    };
    ConfigError::InvalidValue {
        field,
        value: err.kind.to_string(),
        hint: "Check plugdev.toml, .env and the PLUGDEV_* / DEV_* variables".to_string(),
    }
}
