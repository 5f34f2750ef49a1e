//! Environment variables and `.env` files.
//!
//! The `.env` file is read into a map and layered *under* the process
//! environment; nothing here mutates the process environment.

use std::collections::BTreeMap;
use std::path::Path;

/// Name -> value snapshot of environment variables.
pub type EnvMap = BTreeMap<String, String>;

/// Legacy variable names and the config keys they set.
const ENV_KEYS: &[(&str, &str)] = &[
    ("DEV_MODE", "dev.mode"),
    ("DEV_LAZY_WINDOW", "dev.lazy_window"),
    ("VITE_PORT", "dev.port"),
    ("VITE_HOST", "dev.host"),
    ("DEV_HTTPS_DOMAINS", "dev.https_domains"),
    ("DEV_UPLOAD", "upload.enabled"),
    ("DEV_LOCAL_LOG_ENABLED", "log.local_enabled"),
    ("DEV_LOG_DIR", "log.dir"),
    ("QUIET", "log.quiet"),
    ("NODE_ENV", "log.node_env"),
    ("PLUGIN_ROOT", "paths.plugin_root"),
    ("MANIFEST_VALIDATE", "manifest.validate"),
];

const GENERIC_PREFIX: &str = "PLUGDEV_";

/// Config key for an environment variable, if it sets one.
///
/// `PLUGDEV_DEV__PORT` maps to `dev.port`; the legacy names in
/// [`ENV_KEYS`] map to their fixed keys.
pub fn config_key(name: &str) -> Option<String> {
    if let Some(rest) = name.strip_prefix(GENERIC_PREFIX) {
        if rest.is_empty() {
            return None;
        }
        return Some(rest.to_ascii_lowercase().replace("__", "."));
    }
    ENV_KEYS
        .iter()
        .find(|(var, _)| *var == name)
        .map(|(_, key)| key.to_string())
}

/// Older setups used `DEV_MODE=true|false`. Those values carry no mode and
/// are skipped instead of being rejected.
pub fn is_legacy_mode_flag(name: &str, value: &str) -> bool {
    name == "DEV_MODE" && parse_bool(value).is_some()
}

/// Parse `1/true/yes/on` and `0/false/no/off/""`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Parse the contents of a `.env` file with dotenvy's line grammar
/// (`export`, quoting, escapes, inline comments, `${VAR}` substitution).
/// Lines that fail to parse are skipped.
pub fn parse_dotenv(content: &str) -> EnvMap {
    let mut vars = EnvMap::new();
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        match item {
            Ok((key, value)) => {
                vars.insert(key, value);
            }
            Err(dotenvy::Error::LineParse(line, _)) => {
                tracing::debug!(line = %line, "Skipping unparseable .env line");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Stopped reading .env");
                break;
            }
        }
    }
    vars
}

/// Read a `.env` file. A missing file is an empty map.
pub fn load_dotenv(path: &Path) -> std::io::Result<EnvMap> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(parse_dotenv(&content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(EnvMap::new()),
        Err(err) => Err(err),
    }
}

/// Layer `process` over `file`: process variables always win.
pub fn merge_env(file: EnvMap, process: EnvMap) -> EnvMap {
    let mut merged = file;
    merged.extend(process);
    merged
}

/// Snapshot of the current process environment (valid UTF-8 only).
pub fn process_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_prefix_maps_sections() {
        assert_eq!(config_key("PLUGDEV_DEV__PORT").as_deref(), Some("dev.port"));
        assert_eq!(
            config_key("PLUGDEV_BUNDLER__COMMAND").as_deref(),
            Some("bundler.command")
        );
        assert_eq!(config_key("PLUGDEV_"), None);
    }

    #[test]
    fn test_legacy_names_map_to_fixed_keys() {
        assert_eq!(config_key("VITE_PORT").as_deref(), Some("dev.port"));
        assert_eq!(config_key("DEV_LAZY_WINDOW").as_deref(), Some("dev.lazy_window"));
        assert_eq!(config_key("PATH"), None);
    }

    #[test]
    fn test_legacy_mode_flags() {
        assert!(is_legacy_mode_flag("DEV_MODE", "true"));
        assert!(is_legacy_mode_flag("DEV_MODE", "0"));
        assert!(!is_legacy_mode_flag("DEV_MODE", "lazy"));
        assert!(!is_legacy_mode_flag("DEV_UPLOAD", "true"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_dotenv() {
        let vars = parse_dotenv(
            r#"
# comment
DEV_MODE=lazy
export VITE_PORT=5174
KINTONE_DEV_PASSWORD="p@ss # not a comment"
SINGLE='raw \n value'
ESCAPED="line1\nline2"
DEV_LAZY_WINDOW=45s # trailing comment
not an assignment
=missing-key
"#,
        );

        assert_eq!(vars["DEV_MODE"], "lazy");
        assert_eq!(vars["VITE_PORT"], "5174");
        assert_eq!(vars["KINTONE_DEV_PASSWORD"], "p@ss # not a comment");
        assert_eq!(vars["SINGLE"], "raw \\n value");
        assert_eq!(vars["ESCAPED"], "line1\nline2");
        assert_eq!(vars["DEV_LAZY_WINDOW"], "45s");
        assert_eq!(vars.len(), 6);
    }

    #[test]
    fn test_parse_dotenv_substitution_and_multiline() {
        let vars = parse_dotenv(concat!(
            "PLUGDEV_SAMPLE_HOST=example.cybozu.com\n",
            "KINTONE_DEV_BASE_URL=https://${PLUGDEV_SAMPLE_HOST}/\n",
            "QUOTED=\"say \\\"hi\\\"\"\n",
            "CERT=\"-----BEGIN\nabc\n-----END\"\n",
        ));

        assert_eq!(vars["KINTONE_DEV_BASE_URL"], "https://example.cybozu.com/");
        assert_eq!(vars["QUOTED"], "say \"hi\"");
        assert_eq!(vars["CERT"], "-----BEGIN\nabc\n-----END");
    }

    #[test]
    fn test_process_env_wins() {
        let file = parse_dotenv("VITE_PORT=5174\nDEV_MODE=lazy\n");
        let process = EnvMap::from([("VITE_PORT".to_string(), "6000".to_string())]);
        let merged = merge_env(file, process);

        assert_eq!(merged["VITE_PORT"], "6000");
        assert_eq!(merged["DEV_MODE"], "lazy");
    }

    #[test]
    fn test_missing_dotenv_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_dotenv(&dir.path().join(".env")).unwrap().is_empty());
    }
}
