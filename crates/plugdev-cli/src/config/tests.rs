use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::*;
use crate::error::ConfigError;

fn repo(toml: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("plugdev.toml"), toml).unwrap();
    temp
}

fn env(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn load(root: &Path, process: EnvMap, overrides: ConfigOverrides) -> Result<LoadedConfig, ConfigError> {
    PlugdevConfig::load(&LoadOptions {
        cwd: root.to_path_buf(),
        config_path: None,
        overrides,
        env: process,
    })
}

#[test]
fn test_defaults() {
    let temp = repo("");
    let loaded = load(temp.path(), EnvMap::new(), ConfigOverrides::default()).unwrap();
    let settings = loaded.settings;

    assert_eq!(settings.schedule.mode, DevMode::Instant);
    assert_eq!(settings.schedule.quiet_window, Duration::from_secs(60));
    assert_eq!(settings.schedule.coalesce_delay, Duration::from_millis(200));
    assert_eq!(settings.worker_timeout, Some(Duration::from_secs(600)));
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 5173);
    assert_eq!(settings.validate, ValidateMode::Strict);
    assert!(settings.log.enabled());
    assert!(!settings.upload.enabled);
    assert_eq!(settings.paths.repo_root, temp.path());
    assert_eq!(loaded.config_file.as_deref(), Some(temp.path().join("plugdev.toml").as_path()));
}

#[test]
fn test_toml_sections() {
    let temp = repo(
        r#"
[dev]
mode = "lazy"
lazy_window = "45s"
port = 6000
https_domains = ["dev.example.test"]

[paths]
plugin_root = "packages/plugin"

[bundler]
command = ["esbuild", "{input}", "--outfile={output}"]
"#,
    );
    let settings = load(temp.path(), EnvMap::new(), ConfigOverrides::default())
        .unwrap()
        .settings;

    assert_eq!(settings.schedule.mode, DevMode::Lazy);
    assert_eq!(settings.schedule.quiet_window, Duration::from_secs(45));
    assert_eq!(settings.server.port, 6000);
    assert_eq!(
        settings.server.certificate_domains(),
        vec!["localhost", "127.0.0.1", "dev.example.test"]
    );
    assert_eq!(settings.paths.src_root, temp.path().join("packages/plugin/src"));
    assert_eq!(settings.bundler.command[0], "esbuild");
}

#[test]
fn test_precedence_toml_dotenv_process_cli() {
    let temp = repo("[dev]\nport = 6000\nlazy_window = \"10s\"\nhost = \"0.0.0.0\"\n");
    fs::write(
        temp.path().join(".env"),
        "VITE_PORT=6001\nDEV_LAZY_WINDOW=20s\nVITE_HOST=localhost\n",
    )
    .unwrap();

    let process = env(&[("VITE_PORT", "6002"), ("DEV_LAZY_WINDOW", "30s")]);
    let overrides = ConfigOverrides {
        port: Some(6003),
        ..Default::default()
    };
    let settings = load(temp.path(), process, overrides).unwrap().settings;

    assert_eq!(settings.server.port, 6003);
    assert_eq!(settings.schedule.quiet_window, Duration::from_secs(30));
    assert_eq!(settings.server.host, "localhost");
}

#[test]
fn test_generic_env_names() {
    let temp = repo("");
    let process = env(&[
        ("PLUGDEV_DEV__COALESCE_DELAY", "350ms"),
        ("PLUGDEV_MANIFEST__VALIDATE", "warn"),
    ]);
    let settings = load(temp.path(), process, ConfigOverrides::default())
        .unwrap()
        .settings;

    assert_eq!(settings.schedule.coalesce_delay, Duration::from_millis(350));
    assert_eq!(settings.validate, ValidateMode::Warn);
}

#[test]
fn test_legacy_dev_mode_flag_is_ignored() {
    let temp = repo("[dev]\nmode = \"lazy\"\n");
    let settings = load(temp.path(), env(&[("DEV_MODE", "true")]), ConfigOverrides::default())
        .unwrap()
        .settings;

    assert_eq!(settings.schedule.mode, DevMode::Lazy);
}

#[test]
fn test_https_domains_from_comma_list() {
    let temp = repo("");
    let process = env(&[("DEV_HTTPS_DOMAINS", "a.test, b.test,,localhost")]);
    let settings = load(temp.path(), process, ConfigOverrides::default())
        .unwrap()
        .settings;

    assert_eq!(
        settings.server.certificate_domains(),
        vec!["localhost", "127.0.0.1", "a.test", "b.test"]
    );
}

#[test]
fn test_invalid_duration_is_fatal() {
    let temp = repo("");
    let err = load(
        temp.path(),
        env(&[("DEV_LAZY_WINDOW", "soon")]),
        ConfigOverrides::default(),
    )
    .unwrap_err();

    match err {
        ConfigError::InvalidDuration { field, value } => {
            assert_eq!(field, "dev.lazy_window");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unknown_mode_is_fatal() {
    let temp = repo("[dev]\nmode = \"eager\"\n");
    let err = load(temp.path(), EnvMap::new(), ConfigOverrides::default()).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert!(err.to_string().contains("dev.mode"));
}

#[test]
fn test_invalid_port_is_fatal() {
    let temp = repo("");
    let err = load(temp.path(), env(&[("VITE_PORT", "70000")]), ConfigOverrides::default())
        .unwrap_err();

    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_zero_worker_timeout_disables_it() {
    let temp = repo("[dev]\nworker_timeout = \"0s\"\n");
    let settings = load(temp.path(), EnvMap::new(), ConfigOverrides::default())
        .unwrap()
        .settings;

    assert_eq!(settings.worker_timeout, None);
}

#[test]
fn test_production_disables_local_log() {
    let temp = repo("[log]\nlocal_enabled = true\n");
    let settings = load(
        temp.path(),
        env(&[("NODE_ENV", "production")]),
        ConfigOverrides::default(),
    )
    .unwrap()
    .settings;

    assert!(!settings.log.enabled());
    assert!(settings.log.disabled_reason.unwrap().contains("production"));
}

#[test]
fn test_local_log_flag() {
    let temp = repo("");
    let settings = load(
        temp.path(),
        env(&[("DEV_LOCAL_LOG_ENABLED", "false")]),
        ConfigOverrides::default(),
    )
    .unwrap()
    .settings;

    assert!(settings.log.disabled_reason.unwrap().contains("DEV_LOCAL_LOG_ENABLED=false"));
}

#[test]
fn test_credentials_need_all_three_values() {
    let temp = repo("");
    fs::write(
        temp.path().join(".env"),
        "KINTONE_DEV_BASE_URL=https://example.cybozu.com/\nKINTONE_DEV_USERNAME=dev\n",
    )
    .unwrap();

    let partial = load(temp.path(), EnvMap::new(), ConfigOverrides::default())
        .unwrap()
        .settings;
    assert!(partial.upload.credentials.is_none());

    let full = load(
        temp.path(),
        env(&[("KINTONE_DEV_PASSWORD", "12345")]),
        ConfigOverrides::default(),
    )
    .unwrap()
    .settings;
    let credentials = full.upload.credentials.unwrap();
    assert_eq!(credentials.base_url, "https://example.cybozu.com");
    assert_eq!(credentials.password, "12345");
    assert!(!format!("{credentials:?}").contains("12345"));
}

#[test]
fn test_production_credentials_and_plugin_id() {
    let temp = repo("");
    fs::write(
        temp.path().join(".env"),
        "KINTONE_PROD_BASE_URL=https://prod.cybozu.com\nKINTONE_PROD_USERNAME=ops\nKINTONE_PROD_PASSWORD=pw\nKINTONE_DEV_PLUGIN_ID=dev-id\n",
    )
    .unwrap();

    let upload = load(
        temp.path(),
        env(&[("KINTONE_PLUGIN_ID", "shared-id")]),
        ConfigOverrides::default(),
    )
    .unwrap()
    .settings
    .upload;
    assert!(upload.credentials_for(UploadTarget::Dev).is_none());
    let production = upload.credentials_for(UploadTarget::Prod).unwrap();
    assert_eq!(production.base_url, "https://prod.cybozu.com");
    assert_eq!(production.username, "ops");
    assert_eq!(upload.plugin_id.as_deref(), Some("shared-id"));
}

#[test]
fn test_explicit_missing_config_file() {
    let temp = repo("");
    let err = PlugdevConfig::load(&LoadOptions {
        config_path: Some("missing.toml".into()),
        ..LoadOptions::new(temp.path())
    })
    .unwrap_err();

    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn test_unknown_toml_key_is_rejected() {
    let temp = repo("[dev]\nprot = 1\n");
    let err = load(temp.path(), EnvMap::new(), ConfigOverrides::default()).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_serialization() {
    assert_eq!(serde_json::to_string(&DevMode::Lazy).unwrap(), "\"lazy\"");
    assert_eq!(serde_json::to_string(&ValidateMode::Off).unwrap(), "\"off\"");

    let value = serde_json::to_value(PlugdevConfig::default()).unwrap();
    assert_eq!(value["dev"]["lazy_window"], "60s");
    assert!(value["paths"].get("plugin_root").is_none());
}
