//! Live reload client.
//!
//! The browser script served at `/__live/client.js` and [`ClientMachine`]
//! implement the same state machine; the Rust one is what the tests pin
//! down, the script is its transcription. Both read their constants from
//! [`ClientPolicy`], which is embedded into the script when it is served.
//!
//! ```text
//!   start ──► ConnectingWs ──open──► ConnectedWs
//!   (no origin: Inert)  │ close/error (retries left: wait, reconnect)
//!                       ▼ retries exhausted
//!                 ConnectingSse ──open──► ConnectedSse
//!                       │ error
//!                       ▼
//!                    Polling ──(max consecutive failures)──► Stopped
//! ```

use std::borrow::Cow;

use rust_embed::RustEmbed;
use serde::Serialize;
use url::Url;

#[derive(RustEmbed)]
#[folder = "assets/live"]
struct LiveAssets;

const POLICY_PLACEHOLDER: &str = "const POLICY = null;";

/// Fallback ladder timing shared by both implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPolicy {
    pub ws_retries: u32,
    pub ws_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_max_interval_ms: u64,
    pub poll_max_failures: u32,
    /// `localStorage` key that turns on console debugging
    pub debug_key: String,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            ws_retries: 1,
            ws_retry_delay_ms: 800,
            poll_interval_ms: 1_000,
            poll_max_interval_ms: 60_000,
            poll_max_failures: 8,
            debug_key: "pluginLiveReloadDebug".to_string(),
        }
    }
}

impl ClientPolicy {
    /// Poll delay after `failures` consecutive failures.
    pub fn poll_delay(&self, failures: u32) -> u64 {
        let factor = 1u64.checked_shl(failures.min(63)).unwrap_or(u64::MAX);
        self.poll_interval_ms
            .saturating_mul(factor)
            .min(self.poll_max_interval_ms)
    }
}

/// The browser script with `policy` embedded.
pub fn client_script(policy: &ClientPolicy) -> Option<String> {
    let asset = LiveAssets::get("client.js")?;
    let source: Cow<'_, str> = String::from_utf8_lossy(asset.data.as_ref());
    let policy_json = serde_json::to_string(policy).ok()?;
    Some(source.replace(POLICY_PLACEHOLDER, &format!("const POLICY = {policy_json};")))
}

/// Dev server origin from the URL of the running client script.
///
/// Only scripts served by the dev server itself (under `/__static/` or
/// `/__live/`, from `localhost` or `127.0.0.1`) count; anything else means
/// the page was not loaded through the dev plugin and the client stays
/// inert.
pub fn infer_origin(script_url: &str) -> Option<String> {
    let url = Url::parse(script_url).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    if !matches!(url.host_str(), Some("localhost" | "127.0.0.1")) {
        return None;
    }
    let path = url.path();
    if !path.starts_with("/__static/") && !path.starts_with("/__live/") {
        return None;
    }
    Some(url.origin().ascii_serialization())
}

/// Browser APIs the page offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub websocket: bool,
    pub event_source: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            websocket: true,
            event_source: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Inert,
    ConnectingWs,
    ConnectedWs,
    ConnectingSse,
    ConnectedSse,
    Polling,
    Stopped,
}

/// Side effects the machine asks its host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    OpenWebSocket { url: String, delay_ms: u64 },
    OpenEventSource { url: String },
    Poll { url: String, delay_ms: u64 },
    Reload,
    /// One-time console message
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct ClientMachine {
    policy: ClientPolicy,
    capabilities: Capabilities,
    state: ClientState,
    origin: Option<String>,
    ws_failures: u32,
    poll_failures: u32,
    /// First timestamp seen during the page lifetime
    baseline: Option<i64>,
    reloading: bool,
}

impl ClientMachine {
    pub fn new(policy: ClientPolicy, capabilities: Capabilities) -> Self {
        Self {
            policy,
            capabilities,
            state: ClientState::Inert,
            origin: None,
            ws_failures: 0,
            poll_failures: 0,
            baseline: None,
            reloading: false,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn baseline(&self) -> Option<i64> {
        self.baseline
    }

    pub fn start(&mut self, script_url: Option<&str>) -> Vec<ClientAction> {
        self.origin = script_url.and_then(infer_origin);
        if self.origin.is_none() {
            self.state = ClientState::Inert;
            return Vec::new();
        }
        if self.capabilities.websocket {
            self.open_websocket(0)
        } else {
            self.fall_back()
        }
    }

    pub fn on_ws_open(&mut self) {
        if self.state == ClientState::ConnectingWs {
            self.state = ClientState::ConnectedWs;
            self.ws_failures = 0;
        }
    }

    /// The socket closed or failed, whether or not it ever opened.
    pub fn on_ws_closed(&mut self) -> Vec<ClientAction> {
        if !matches!(self.state, ClientState::ConnectingWs | ClientState::ConnectedWs) {
            return Vec::new();
        }
        if self.ws_failures < self.policy.ws_retries {
            self.ws_failures += 1;
            self.open_websocket(self.policy.ws_retry_delay_ms)
        } else {
            self.fall_back()
        }
    }

    pub fn on_sse_open(&mut self) {
        if self.state == ClientState::ConnectingSse {
            self.state = ClientState::ConnectedSse;
        }
    }

    pub fn on_sse_error(&mut self) -> Vec<ClientAction> {
        if !matches!(self.state, ClientState::ConnectingSse | ClientState::ConnectedSse) {
            return Vec::new();
        }
        self.start_polling()
    }

    /// Outcome of one `GET /__live`.
    pub fn on_poll_result(&mut self, result: Option<i64>) -> Vec<ClientAction> {
        if self.state != ClientState::Polling {
            return Vec::new();
        }
        let Some(url) = self.url("/__live", false) else {
            return Vec::new();
        };
        match result {
            Some(ts) => {
                self.poll_failures = 0;
                let mut actions = self.on_timestamp(ts);
                if !self.reloading {
                    actions.push(ClientAction::Poll {
                        url,
                        delay_ms: self.policy.poll_interval_ms,
                    });
                }
                actions
            }
            None => {
                self.poll_failures += 1;
                if self.poll_failures >= self.policy.poll_max_failures {
                    self.state = ClientState::Stopped;
                    return vec![ClientAction::Notice(format!(
                        "[live-reload] dev server unreachable after {} attempts; live reload stopped",
                        self.poll_failures
                    ))];
                }
                vec![ClientAction::Poll {
                    url,
                    delay_ms: self.policy.poll_delay(self.poll_failures),
                }]
            }
        }
    }

    /// A `{ts}` arrived on any channel.
    pub fn on_timestamp(&mut self, ts: i64) -> Vec<ClientAction> {
        if self.reloading {
            return Vec::new();
        }
        match self.baseline {
            None => {
                self.baseline = Some(ts);
                Vec::new()
            }
            Some(baseline) if ts > baseline => {
                self.reloading = true;
                vec![ClientAction::Reload]
            }
            Some(_) => Vec::new(),
        }
    }

    fn open_websocket(&mut self, delay_ms: u64) -> Vec<ClientAction> {
        self.state = ClientState::ConnectingWs;
        self.url("/__live/ws", true)
            .map(|url| vec![ClientAction::OpenWebSocket { url, delay_ms }])
            .unwrap_or_default()
    }

    fn fall_back(&mut self) -> Vec<ClientAction> {
        if self.capabilities.event_source {
            self.state = ClientState::ConnectingSse;
            self.url("/__live/sse", false)
                .map(|url| vec![ClientAction::OpenEventSource { url }])
                .unwrap_or_default()
        } else {
            self.start_polling()
        }
    }

    fn start_polling(&mut self) -> Vec<ClientAction> {
        self.state = ClientState::Polling;
        self.poll_failures = 0;
        self.url("/__live", false)
            .map(|url| vec![ClientAction::Poll { url, delay_ms: 0 }])
            .unwrap_or_default()
    }

    fn url(&self, path: &str, websocket: bool) -> Option<String> {
        let origin = self.origin.as_deref()?;
        if !websocket {
            return Some(format!("{origin}{path}"));
        }
        let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            origin.to_string()
        };
        Some(format!("{ws_origin}{path}"))
    }
}
