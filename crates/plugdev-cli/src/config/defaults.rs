//! Default values for configuration fields.

pub const DEFAULT_LAZY_WINDOW: &str = "60s";
pub const DEFAULT_COALESCE_DELAY: &str = "200ms";
pub const DEFAULT_WORKER_TIMEOUT: &str = "10m";
pub const DEFAULT_DEPLOY_DEBOUNCE: &str = "5s";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5173;

/// How many ports after the requested one are tried before giving up.
pub const PORT_SEARCH_SPAN: u16 = 10;

pub const CONFIG_FILE_NAME: &str = "plugdev.toml";
pub const ENV_FILE_NAME: &str = ".env";
pub const LOG_FILE_NAME: &str = "dev.log";

/// Files whose presence marks the repository root.
pub const REPO_ROOT_MARKERS: &[&str] = &[CONFIG_FILE_NAME, "pnpm-workspace.yaml", ".git"];

/// esbuild, one IIFE bundle per entry, with a metafile listing its inputs.
pub fn default_bundler_command() -> Vec<String> {
    [
        "npx",
        "esbuild",
        "{input}",
        "--bundle",
        "--format=iife",
        "--outfile={output}",
        "--metafile={metafile}",
        "--loader:.js=jsx",
        "--log-level=warning",
        "--define:__PLUGIN_VERSION__=\"{version}\"",
        "--define:__DEV_SERVER_PORT__={port}",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Bundler warnings that are pure noise for per-entry dev bundles.
pub fn default_suppressed_warnings() -> Vec<String> {
    vec![
        "CHUNK_SIZE_LIMIT".to_string(),
        "MODULE_LEVEL_DIRECTIVE".to_string(),
    ]
}
