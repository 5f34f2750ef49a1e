//! Resolved settings: every duration parsed, every path absolute.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::env::EnvMap;
use crate::config::paths::{ProjectPaths, absolutize};
use crate::config::{BundlerSection, DurationText, PlugdevConfig, TlsSection, ValidateMode};
use crate::dev::scheduler::SchedulePolicy;
use crate::error::ConfigError;

/// Everything the dev server needs, validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paths: ProjectPaths,
    pub schedule: SchedulePolicy,
    pub server: ServerSettings,
    /// `None` means the worker may run forever
    pub worker_timeout: Option<Duration>,
    pub validate: ValidateMode,
    pub bundler: BundlerSection,
    pub package_command: Vec<String>,
    pub upload: UploadSettings,
    pub tls: TlsSection,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub https_domains: Vec<String>,
    pub serve_source_fallback: bool,
    pub inject_client: bool,
}

impl ServerSettings {
    /// Domains a certificate must cover: the loopback names plus extras.
    pub fn certificate_domains(&self) -> Vec<String> {
        let mut domains = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        for domain in &self.https_domains {
            if !domains.contains(domain) {
                domains.push(domain.clone());
            }
        }
        domains
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub file: PathBuf,
    /// Why the local log is off, if it is
    pub disabled_reason: Option<String>,
    pub quiet: bool,
}

impl LogSettings {
    pub fn enabled(&self) -> bool {
        self.disabled_reason.is_none()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub enabled: bool,
    pub command: Vec<String>,
    /// Absent when any `KINTONE_DEV_*` variable is missing
    pub credentials: Option<Credentials>,
    /// `KINTONE_PROD_*`, used by release uploads
    pub production: Option<Credentials>,
    /// Release plugin id from `KINTONE_PROD_PLUGIN_ID`, `KINTONE_PLUGIN_ID`
    /// or `KINTONE_DEV_PLUGIN_ID`, in that order
    pub plugin_id: Option<String>,
}

impl UploadSettings {
    pub fn credentials_for(&self, target: UploadTarget) -> Option<&Credentials> {
        match target {
            UploadTarget::Dev => self.credentials.as_ref(),
            UploadTarget::Prod => self.production.as_ref(),
        }
    }
}

/// Which platform environment a release upload goes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UploadTarget {
    #[default]
    Dev,
    Prod,
}

impl UploadTarget {
    /// Prefix of the credential variables, e.g. `KINTONE_PROD`.
    pub fn env_prefix(self) -> &'static str {
        match self {
            UploadTarget::Dev => "KINTONE_DEV",
            UploadTarget::Prod => "KINTONE_PROD",
        }
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadTarget::Dev => f.write_str("dev"),
            UploadTarget::Prod => f.write_str("prod"),
        }
    }
}

impl Settings {
    pub fn resolve(
        config: &PlugdevConfig,
        repo_root: &Path,
        env: &EnvMap,
    ) -> Result<Self, ConfigError> {
        let dev = &config.dev;

        let quiet_window = required_duration("dev.lazy_window", &dev.lazy_window)?;
        let coalesce_delay = required_duration("dev.coalesce_delay", &dev.coalesce_delay)?;
        let worker_timeout = optional_duration("dev.worker_timeout", &dev.worker_timeout)?;

        if dev.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dev.host".to_string(),
                value: "\"\"".to_string(),
                hint: "Set VITE_HOST or dev.host to an interface address, e.g. 127.0.0.1"
                    .to_string(),
            });
        }

        if config.bundler.command.is_empty() {
            return Err(ConfigError::MissingField {
                field: "bundler.command".to_string(),
                hint: "Give the bundler invocation as an array, e.g. [\"npx\", \"esbuild\", \"{input}\", ...]"
                    .to_string(),
            });
        }

        let paths = ProjectPaths::resolve(repo_root, &config.paths, &config.log);

        let disabled_reason = if config
            .log
            .node_env
            .as_deref()
            .is_some_and(|env| env.trim().eq_ignore_ascii_case("production"))
        {
            Some("Local logging is disabled in production mode (NODE_ENV=production)".to_string())
        } else if !config.log.local_enabled {
            Some("Local logging is disabled (DEV_LOCAL_LOG_ENABLED=false)".to_string())
        } else {
            None
        };

        let tls = TlsSection {
            cert: config.tls.cert.as_deref().map(|p| absolutize(repo_root, p)),
            key: config.tls.key.as_deref().map(|p| absolutize(repo_root, p)),
            dir: config.tls.dir.as_deref().map(|p| absolutize(repo_root, p)),
        };

        Ok(Self {
            schedule: SchedulePolicy::new(dev.mode, quiet_window, coalesce_delay),
            server: ServerSettings {
                host: dev.host.trim().to_string(),
                port: dev.port,
                https_domains: dev.https_domains.0.clone(),
                serve_source_fallback: dev.serve_source_fallback,
                inject_client: dev.inject_client,
            },
            worker_timeout,
            validate: config.manifest.validate,
            bundler: config.bundler.clone(),
            package_command: config.package.command.clone(),
            upload: UploadSettings {
                enabled: config.upload.enabled,
                command: config.upload.command.clone(),
                credentials: credentials_from_env(env, UploadTarget::Dev),
                production: credentials_from_env(env, UploadTarget::Prod),
                plugin_id: ["KINTONE_PROD_PLUGIN_ID", "KINTONE_PLUGIN_ID", "KINTONE_DEV_PLUGIN_ID"]
                    .iter()
                    .filter_map(|name| env.get(*name))
                    .map(|id| id.trim())
                    .find(|id| !id.is_empty())
                    .map(str::to_string),
            },
            tls,
            log: LogSettings {
                file: paths.log_file.clone(),
                disabled_reason,
                quiet: config.log.quiet,
            },
            paths,
        })
    }
}

fn required_duration(field: &str, text: &DurationText) -> Result<Duration, ConfigError> {
    parse_duration(text.as_str()).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: text.as_str().to_string(),
    })
}

/// Like [`required_duration`], but a zero amount (`0`, `0s`, `0ms`) disables.
fn optional_duration(field: &str, text: &DurationText) -> Result<Option<Duration>, ConfigError> {
    let amount = text
        .as_str()
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic());
    if amount.parse::<f64>().is_ok_and(|n| n == 0.0) {
        return Ok(None);
    }
    required_duration(field, text).map(Some)
}

fn credentials_from_env(env: &EnvMap, target: UploadTarget) -> Option<Credentials> {
    let prefix = target.env_prefix();
    let get = |name: &str| {
        env.get(&format!("{prefix}_{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    Some(Credentials {
        base_url: get("BASE_URL")?.trim_end_matches('/').to_string(),
        username: get("USERNAME")?,
        password: env
            .get(&format!("{prefix}_PASSWORD"))
            .filter(|v| !v.is_empty())?
            .clone(),
    })
}
