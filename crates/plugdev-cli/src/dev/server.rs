//! Development HTTP server.
//!
//! Serves the compiled entries under `/__static`, the live reload channels
//! under `/__live`, and browser log ingestion at `/__devlog`.

use std::convert::Infallible;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio_stream::Stream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::defaults::PORT_SEARCH_SPAN;
use crate::dev::client::{ClientPolicy, client_script};
use crate::dev::devlog::DevLog;
use crate::dev::hub::{LiveHub, ts_payload};
use crate::dev::tls::TlsKeypair;
use crate::error::{CliError, Result};

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Where browser log posts go.
#[derive(Debug, Clone)]
pub enum DevLogTarget {
    Enabled(Arc<DevLog>),
    /// Posts are acknowledged but dropped
    Disabled(String),
}

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub hub: LiveHub,
    pub devlog: DevLogTarget,
    /// Dev plugin id, once the packager reported one
    pub plugin_id: Arc<RwLock<Option<String>>>,
    pub client_policy: ClientPolicy,
}

impl AppState {
    pub fn new(hub: LiveHub, devlog: DevLogTarget) -> Self {
        Self {
            hub,
            devlog,
            plugin_id: Arc::default(),
            client_policy: ClientPolicy::default(),
        }
    }
}

/// Directories behind `/__static`.
#[derive(Debug, Clone)]
pub struct StaticDirs {
    pub live: PathBuf,
    /// Raw source files served when the build output has no match
    pub source_fallback: Option<PathBuf>,
}

/// Build the router with all routes.
pub fn router(state: AppState, statics: &StaticDirs) -> Router {
    Router::new()
        .route("/__live", get(live_poll))
        .route("/__live/sse", get(live_sse))
        .route("/__live/ws", get(live_ws))
        .route("/__live/client.js", get(live_client_script))
        .route(
            "/__devlog",
            post(ingest_devlog).options(|| async { StatusCode::NO_CONTENT }),
        )
        .nest_service("/__static", static_files(statics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn static_files(statics: &StaticDirs) -> Router {
    let live = ServeDir::new(&statics.live);
    let files = match &statics.source_fallback {
        Some(src) => Router::new().fallback_service(live.fallback(ServeDir::new(src))),
        None => Router::new().fallback_service(live),
    };
    files
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
}

async fn live_poll(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(json!({ "ts": state.hub.timestamp() })),
    )
}

async fn live_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut subscription = state.hub.subscribe();
    tracing::debug!(client = subscription.id(), "Live client connected via SSE");

    let stream = async_stream::stream! {
        while let Some(ts) = subscription.next().await {
            yield Ok::<_, Infallible>(Event::default().data(ts_payload(ts)));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("ping"))
}

async fn live_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| live_socket(socket, state.hub))
}

async fn live_socket(socket: WebSocket, hub: LiveHub) {
    let mut subscription = hub.subscribe();
    let client = subscription.id();
    tracing::debug!(client, "Live client connected via WebSocket");

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            ts = subscription.next() => {
                let Some(ts) = ts else { break };
                if sender.send(Message::Text(ts_payload(ts).into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(client, "Live client disconnected");
}

async fn live_client_script(State(state): State<AppState>) -> Response {
    match client_script(&state.client_policy) {
        Some(script) => (
            [
                (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            script,
        )
            .into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing embedded live reload client",
        )
            .into_response(),
    }
}

async fn ingest_devlog(State(state): State<AppState>, body: Bytes) -> Response {
    let sink = match &state.devlog {
        DevLogTarget::Enabled(sink) => sink.clone(),
        DevLogTarget::Disabled(reason) => {
            return Json(json!({ "ok": false, "disabled": true, "reason": reason }))
                .into_response();
        }
    };

    let plugin_id = state.plugin_id.read().clone();
    let Some(record) = devlog_record(&body, plugin_id.as_deref()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "Invalid JSON payload" })),
        )
            .into_response();
    };

    match sink.append(record) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Shape a browser log post into a record. `None` for invalid JSON.
///
/// An empty body is `{}`, a non-object payload becomes `{message: payload}`,
/// and `pluginId` is added when known and not already present.
pub fn devlog_record(body: &[u8], plugin_id: Option<&str>) -> Option<Map<String, Value>> {
    let text = std::str::from_utf8(body).ok()?;
    let payload = if text.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(text).ok()?
    };

    let mut record = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("message".to_string(), other);
            map
        }
    };
    if let Some(id) = plugin_id {
        record
            .entry("pluginId")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    Some(record)
}

/// A listening socket and the port it ended up on.
#[derive(Debug)]
pub struct BoundListener {
    pub listener: TcpListener,
    pub addr: SocketAddr,
    pub requested_port: u16,
}

impl BoundListener {
    pub fn port_changed(&self) -> bool {
        self.addr.port() != self.requested_port
    }
}

/// Bind `host:port`, moving on to the next ports while they are taken.
pub fn bind_with_fallback(host: &str, port: u16) -> Result<BoundListener> {
    let last = port.saturating_add(PORT_SEARCH_SPAN);
    for candidate in port..=last {
        match TcpListener::bind((host, candidate)) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                let addr = listener.local_addr()?;
                if candidate != port {
                    tracing::debug!(requested = port, actual = candidate, "Port in use, moved on");
                }
                return Ok(BoundListener {
                    listener,
                    addr,
                    requested_port: port,
                });
            }
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
            Err(err) => {
                return Err(CliError::Server(format!(
                    "Failed to bind to {host}:{candidate}: {err}"
                )));
            }
        }
    }
    Err(CliError::Server(format!(
        "Ports {port}-{last} on {host} are all in use"
    )))
}

/// The HTTP(S) dev server, bound and ready to run.
pub struct DevServer {
    bound: BoundListener,
    tls: Option<TlsKeypair>,
    app: Router,
}

impl DevServer {
    pub fn new(bound: BoundListener, tls: Option<TlsKeypair>, app: Router) -> Self {
        Self { bound, tls, app }
    }

    pub fn addr(&self) -> SocketAddr {
        self.bound.addr
    }

    /// Origin browsers should use, e.g. `https://localhost:5173`.
    pub fn origin(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let ip = self.bound.addr.ip();
        let host = if ip.is_loopback() || ip.is_unspecified() {
            "localhost".to_string()
        } else {
            ip.to_string()
        };
        format!("{scheme}://{host}:{}", self.bound.addr.port())
    }

    /// Serve until the task is dropped or the listener fails.
    pub async fn start(self) -> Result<()> {
        let Self { bound, tls, app } = self;
        match tls {
            Some(keypair) => {
                let config = axum_server::tls_rustls::RustlsConfig::from_pem(
                    keypair.cert_pem,
                    keypair.key_pem,
                )
                .await
                .map_err(|e| CliError::Certificate(format!("Invalid TLS keypair: {e}")))?;
                axum_server::from_tcp_rustls(bound.listener, config)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| CliError::Server(format!("Server error: {e}")))
            }
            None => {
                let listener = tokio::net::TcpListener::from_std(bound.listener)?;
                axum::serve(listener, app)
                    .await
                    .map_err(|e| CliError::Server(format!("Server error: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devlog_record_object_payload() {
        let record = devlog_record(br#"{"level":"error","message":"boom"}"#, Some("abc")).unwrap();
        assert_eq!(record["level"], "error");
        assert_eq!(record["pluginId"], "abc");
    }

    #[test]
    fn test_devlog_record_keeps_client_plugin_id() {
        let record = devlog_record(br#"{"pluginId":"from-page"}"#, Some("abc")).unwrap();
        assert_eq!(record["pluginId"], "from-page");
    }

    #[test]
    fn test_devlog_record_wraps_scalars() {
        let record = devlog_record(br#""just text""#, None).unwrap();
        assert_eq!(record["message"], "just text");
        assert!(!record.contains_key("pluginId"));

        let record = devlog_record(b"[1,2]", None).unwrap();
        assert_eq!(record["message"], json!([1, 2]));
    }

    #[test]
    fn test_devlog_record_empty_body() {
        assert!(devlog_record(b"", None).unwrap().is_empty());
        assert!(devlog_record(b"  \n", None).unwrap().is_empty());
    }

    #[test]
    fn test_devlog_record_invalid_json() {
        assert!(devlog_record(b"{not json", None).is_none());
        assert!(devlog_record(&[0xff, 0xfe], None).is_none());
    }

    #[test]
    fn test_bind_skips_taken_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        if port == u16::MAX {
            return;
        }

        let bound = bind_with_fallback("127.0.0.1", port).unwrap();
        assert_ne!(bound.addr.port(), port);
        assert!(bound.port_changed());
        assert_eq!(bound.requested_port, port);
    }
}
