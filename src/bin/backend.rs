#![forbid(unsafe_code)]

//! Axum backend that relays video extraction to yt-dlp.
//!
//! Two client surfaces share one orchestrator: `POST /api/download` answers
//! with normalized metadata only, and the `/ws/download` WebSocket runs full
//! downloads, pushing progress frames while yt-dlp works. Each WebSocket
//! connection handles one URL at a time and stays open for the next one.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::{signal, sync::mpsc};
use tuberelay_tools::config::{ExtractionConfig, RuntimeOverrides, resolve_runtime_settings};
use tuberelay_tools::extractor::{
    ExtractionMode, Extractor, ProgressUpdate, YtDlp, ensure_program_available,
};
use tuberelay_tools::format::VideoMetadata;
use tuberelay_tools::history::{HistoryLog, record_for};
use tuberelay_tools::orchestrator::{ExtractionOutcome, Orchestrator};
use tuberelay_tools::security::ensure_not_root;

#[derive(Debug, Clone)]
struct BackendArgs {
    download_root: PathBuf,
    port: u16,
    listen_host: IpAddr,
    extraction: ExtractionConfig,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut download_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<IpAddr> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--download-root=") {
                download_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--download-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--download-root requires a value"))?;
                    download_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(RuntimeOverrides {
            download_root: download_root_override,
            port: port_override,
            ..RuntimeOverrides::default()
        })?;
        let runtime_host = parse_host_arg(&settings.host)?;

        Ok(Self {
            download_root: settings.download_root,
            port: settings.port,
            listen_host: host_override.unwrap_or(runtime_host),
            extraction: settings.extraction,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBERELAY_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    history: Arc<HistoryLog>,
    download_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct DownloadRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    status: &'static str,
    video_info: VideoMetadata,
}

/// Frames pushed over `/ws/download`. Zero or more `downloading` frames per
/// URL, then exactly one `complete` or `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum WsFrame {
    Downloading {
        percentage: f64,
        speed: String,
        eta: String,
    },
    Complete {
        video_info: VideoMetadata,
    },
    Error {
        message: String,
    },
}

impl From<ProgressUpdate> for WsFrame {
    fn from(update: ProgressUpdate) -> Self {
        WsFrame::Downloading {
            percentage: update.percentage,
            speed: update.speed,
            eta: update.eta,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ensure_not_root("backend")?;

    let BackendArgs {
        download_root,
        port,
        listen_host,
        extraction,
    } = BackendArgs::parse()?;

    ensure_program_available("yt-dlp")?;

    let history = HistoryLog::new(&download_root);
    history.prepare().context("preparing download history")?;

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new());
    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(extractor, extraction)),
        history: Arc::new(history),
        download_root: Arc::new(download_root),
    };

    let app = Router::new()
        .route("/api/download", post(api_download))
        .route("/ws/download", get(ws_download))
        .with_state(state);

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    println!("Extraction relay listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {err}");
    }
}

/// Metadata-only extraction. Responds with the normalized format list or a
/// classified failure; nothing is written to disk.
async fn api_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadResponse>> {
    let outcome = state
        .orchestrator
        .extract(&payload.url, ExtractionMode::MetadataOnly, None)
        .await;

    match outcome {
        ExtractionOutcome::Success { metadata, .. } => Ok(Json(DownloadResponse {
            status: "success",
            video_info: metadata,
        })),
        ExtractionOutcome::Failure { kind, message } => {
            if kind.is_user_error() {
                Err(ApiError::bad_request(message))
            } else {
                eprintln!("extraction failed for {}: {}", payload.url, message);
                Err(ApiError::internal())
            }
        }
    }
}

async fn ws_download(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let mut transport = WsTransport { socket };
        run_session(&state, &mut transport).await;
    })
}

/// Transport seam for the per-connection loop so tests can drive it without
/// a real socket.
#[async_trait]
trait SessionTransport: Send {
    /// Next URL from the peer; `None` once the connection is gone.
    async fn next_url(&mut self) -> Option<String>;
    /// Delivers one frame. `false` means the peer is gone and every later
    /// send must be skipped.
    async fn send_frame(&mut self, frame: &WsFrame) -> bool;
}

struct WsTransport {
    socket: WebSocket,
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn next_url(&mut self) -> Option<String> {
        while let Some(message) = self.socket.recv().await {
            match message {
                Ok(Message::Text(text)) => {
                    let url = text.as_str().trim().to_string();
                    if !url.is_empty() {
                        return Some(url);
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                // Pings are answered by axum itself; binary frames carry
                // nothing we understand.
                Ok(_) => {}
            }
        }
        None
    }

    async fn send_frame(&mut self, frame: &WsFrame) -> bool {
        let Ok(payload) = serde_json::to_string(frame) else {
            return false;
        };
        self.socket.send(Message::Text(payload.into())).await.is_ok()
    }
}

/// Serial per-connection loop: receive a URL, run the orchestrator to
/// completion while relaying progress in order, emit one terminal frame,
/// then wait for the next URL on the same connection.
async fn run_session<T: SessionTransport>(state: &AppState, transport: &mut T) {
    while let Some(url) = transport.next_url().await {
        let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(64);
        let mode = ExtractionMode::Download {
            dest_dir: state.download_root.as_ref().clone(),
        };
        let job = state.orchestrator.extract(&url, mode, Some(tx));
        tokio::pin!(job);

        // Once a send fails the peer is gone; the job runs to completion
        // regardless, with every further frame suppressed.
        let mut peer_closed = false;

        let outcome = loop {
            tokio::select! {
                outcome = &mut job => break outcome,
                received = rx.recv() => {
                    let Some(update) = received else { continue };
                    if !peer_closed && !transport.send_frame(&update.into()).await {
                        peer_closed = true;
                    }
                }
            }
        };

        // Progress the job buffered before finishing still precedes the
        // terminal frame.
        while let Ok(update) = rx.try_recv() {
            if !peer_closed && !transport.send_frame(&update.into()).await {
                peer_closed = true;
            }
        }

        let terminal = terminal_frame(state, &url, outcome);
        if peer_closed || !transport.send_frame(&terminal).await {
            return;
        }
    }
}

/// Maps the orchestrator outcome to the terminal frame, appending the
/// history record for completed downloads.
fn terminal_frame(state: &AppState, url: &str, outcome: ExtractionOutcome) -> WsFrame {
    match outcome {
        ExtractionOutcome::Success { metadata, filename } => {
            if let Some(filename) = filename.as_deref() {
                let record = record_for(&metadata, filename, Utc::now());
                if let Err(err) = state.history.append(&record) {
                    eprintln!("history append failed for {url}: {err:#}");
                    return WsFrame::Error {
                        message: "Internal server error".to_string(),
                    };
                }
            }
            WsFrame::Complete {
                video_info: metadata,
            }
        }
        ExtractionOutcome::Failure { kind, message } => {
            if !kind.is_user_error() {
                eprintln!("download failed for {url}: {message}");
                return WsFrame::Error {
                    message: "Internal server error".to_string(),
                };
            }
            WsFrame::Error { message }
        }
    }
}
