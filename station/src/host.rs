use std::{
    net::{SocketAddr, UdpSocket},
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use envmon_common::{
    apply_observation, build_report, format_mac, parse_observation, FrameReceiver, IngestAck,
    IngestError, IngestErrorBody, PeerLink, PeerTransport, RadioMode, ReadingCache, ReadingSource,
    StationConfig, TransportError, TransportInitError,
};

#[derive(Clone)]
struct AppState {
    wireless_cache: Arc<ReadingCache>,
    http_cache: Arc<ReadingCache>,
    config: Arc<StationConfig>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = StationConfig::default();
    if let Some(port) = std::env::var("STATION_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
    if let Some(port) = std::env::var("STATION_PEER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.peer_port = port;
    }
    config.sanitize();

    let wireless_cache = Arc::new(ReadingCache::new(
        ReadingSource::Wireless,
        config.freshness_window_ms,
    ));
    let http_cache = Arc::new(ReadingCache::new(
        ReadingSource::Http,
        config.freshness_window_ms,
    ));

    spawn_peer_link(&config, wireless_cache.clone());

    let app_state = AppState {
        wireless_cache,
        http_cache,
        config: Arc::new(config.clone()),
    };

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route(
            "/api/temperature",
            get(handle_get_temperature).post(handle_post_temperature),
        )
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind station server at {addr}"))?;

    info!("station listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bring the peer link up off the main task. On host the "radio" is a UDP
/// socket; the settle delay mirrors the window the radio gets on device.
fn spawn_peer_link(config: &StationConfig, cache: Arc<ReadingCache>) {
    let settle_delay = Duration::from_millis(config.radio_settle_delay_ms);
    let peer_port = config.peer_port;
    let mut link = PeerLink::new(UdpPeerTransport::new(peer_port));
    let receiver = Arc::new(FrameReceiver::new(cache));

    thread::Builder::new()
        .name("peer-link".to_string())
        .spawn(move || {
            thread::sleep(settle_delay);
            match link.bring_up(receiver) {
                Ok(()) => {
                    let station = link
                        .station_mac()
                        .map(|mac| format_mac(&mac))
                        .unwrap_or_else(|| "<unknown>".to_string());
                    info!("peer link active on udp port {peer_port} (station {station})");
                }
                Err(err) => warn!("peer link disabled: {err}"),
            }
        })
        .expect("failed to spawn peer link thread");
}

/// Host stand-in for the peer radio: one datagram is one frame, the remote
/// socket address plays the sender MAC in diagnostics logs.
struct UdpPeerTransport {
    port: u16,
    socket: Option<UdpSocket>,
}

impl UdpPeerTransport {
    fn new(port: u16) -> Self {
        Self { port, socket: None }
    }
}

impl PeerTransport for UdpPeerTransport {
    fn radio_mode(&mut self) -> Result<RadioMode, TransportError> {
        // The host network stack is up once the process runs.
        Ok(RadioMode::Station)
    }

    fn station_mac(&mut self) -> Result<[u8; 6], TransportError> {
        // Locally administered placeholder; the host has no radio MAC.
        Ok([0x02, 0x00, 0x00, 0x00, 0x00, 0x01])
    }

    fn init(&mut self) -> Result<(), TransportInitError> {
        if self.socket.is_some() {
            return Err(TransportInitError::AlreadyActive);
        }
        let socket = UdpSocket::bind(("0.0.0.0", self.port))
            .map_err(|err| TransportInitError::Other(err.to_string()))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        Ok(())
    }

    fn register_receiver(&mut self, receiver: Arc<FrameReceiver>) -> Result<(), TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| TransportError("transport not initialized".to_string()))?
            .try_clone()
            .map_err(|err| TransportError(err.to_string()))?;

        thread::Builder::new()
            .name("peer-recv".to_string())
            .spawn(move || {
                let mut buf = [0_u8; 64];
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok((len, from)) => {
                            match receiver.handle_frame(&buf[..len], monotonic_ms()) {
                                Ok(frame) => info!(
                                    "peer frame from {from}: {:.2}°C / {:.2}%",
                                    frame.temperature, frame.humidity
                                ),
                                Err(err) => {
                                    warn!("discarding peer frame from {from}: {err}");
                                }
                            }
                        }
                        Err(err) => {
                            warn!("peer socket receive failed: {err}");
                            thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(())
    }
}

async fn handle_get_temperature(State(state): State<AppState>) -> impl IntoResponse {
    let report = build_report(&state.wireless_cache, &state.http_cache, monotonic_ms());
    Json(report)
}

async fn handle_post_temperature(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let limit = state.config.max_ingest_body_bytes;

    // Reject on the declared length before looking at the body, the way
    // the device handler refuses to read an oversized request.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if let Some(declared) = declared {
        if declared > limit {
            warn!("rejecting ingest body: {declared} declared bytes over the {limit} byte cap");
            let err = IngestError::BodyTooLarge { declared, limit };
            return text_error(StatusCode::BAD_REQUEST, &err.to_string());
        }
    }
    // Chunked uploads carry no declared length; cap the bytes actually read.
    if body.len() > limit {
        warn!(
            "rejecting ingest body: {} bytes read over the {limit} byte cap",
            body.len()
        );
        let err = IngestError::BodyTooLarge {
            declared: body.len(),
            limit,
        };
        return text_error(StatusCode::BAD_REQUEST, &err.to_string());
    }
    if body.is_empty() {
        return text_error(StatusCode::BAD_REQUEST, &IngestError::BodyUnreadable.to_string());
    }

    let text = String::from_utf8_lossy(&body);
    let observation = parse_observation(&text);
    match apply_observation(
        &state.http_cache,
        observation,
        state.config.partial_update_policy,
        monotonic_ms(),
    ) {
        Ok(()) => {
            info!(
                "http ingest committed: temperature={:?} humidity={:?}",
                observation.temperature, observation.humidity
            );
            Json(IngestAck::ok()).into_response()
        }
        Err(err) => {
            warn!("unparsable ingest body ({} bytes)", body.len());
            (
                StatusCode::BAD_REQUEST,
                Json(IngestErrorBody::new(err.to_string())),
            )
                .into_response()
        }
    }
}

fn text_error(status: StatusCode, message: &str) -> axum::response::Response {
    (status, message.to_string()).into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
