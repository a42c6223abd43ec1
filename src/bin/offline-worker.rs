//! Command-line entry point: a static dev server and a caching proxy that
//! runs the offline worker in front of an origin server.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, get_service, post};
use clap::{Parser, Subcommand};
use reqwest::Url;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use offline_worker::{
    AppConfig, CacheStorage, DiskCacheStorage, Error, FetchOutcome, HttpNetwork,
    MemoryCacheStorage, MessageOutcome, OfflineWorker, Registration, Request, RequestMode,
    Response, StorageBackend, WorkerMessage,
};

/// Largest request body forwarded upstream.
const MAX_BODY: usize = 16 * 1024 * 1024;

/// Headers that describe one hop and must not be copied between connections.
const HOP_HEADERS: [&str; 4] = ["connection", "content-length", "transfer-encoding", "host"];

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline cache manager for static sites")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a directory over HTTP with permissive CORS headers
    Serve {
        /// Directory to serve
        #[arg(long, default_value = ".")]
        root: PathBuf,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8000)]
        port: u16,
    },

    /// Serve an origin through the offline worker
    Proxy {
        /// Config file (defaults to the platform config directory)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        #[arg(long)]
        port: Option<u16>,

        /// Origin server to fetch from
        #[arg(long, value_name = "URL")]
        upstream: Option<String>,

        /// Keep partitions in memory instead of on disk
        #[arg(long)]
        memory: bool,
    },
}

#[tokio::main]
async fn main() -> offline_worker::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Serve { root, host, port } => serve_static(root, &host, port).await,
        Command::Proxy {
            config,
            port,
            upstream,
            memory,
        } => {
            let path = config.unwrap_or_else(AppConfig::default_path);
            let mut config = AppConfig::load_or_default(&path)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(upstream) = upstream {
                config.server.upstream = upstream;
            }
            if memory {
                config.storage.backend = StorageBackend::Memory;
            }

            match config.storage.backend {
                StorageBackend::Memory => {
                    run_proxy(config, Arc::new(MemoryCacheStorage::new())).await
                }
                StorageBackend::Disk => {
                    let storage = DiskCacheStorage::new(config.storage.cache_dir.clone());
                    run_proxy(config, Arc::new(storage)).await
                }
            }
        }
    }
}

// =============================================================================
// Static server
// =============================================================================

async fn serve_static(root: PathBuf, host: &str, port: u16) -> offline_worker::Result<()> {
    log::info!("Serving {} at http://{host}:{port}", root.display());

    let files = get_service(ServeDir::new(root)).options(|| async { StatusCode::OK });
    let app = Router::new()
        .fallback_service(files)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ));

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

// =============================================================================
// Caching proxy
// =============================================================================

struct ProxyState<S: CacheStorage> {
    registration: Registration<HttpNetwork, S>,
    /// Page-facing origin; incoming paths are resolved against it.
    origin: Url,
    upstream: Url,
    client: reqwest::Client,
}

type SharedState<S> = Arc<ProxyState<S>>;

async fn run_proxy<S: CacheStorage + 'static>(
    config: AppConfig,
    storage: Arc<S>,
) -> offline_worker::Result<()> {
    let upstream = Url::parse(&config.server.upstream)
        .map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.server.upstream)))?;
    let network = HttpNetwork::with_upstream(upstream.clone())?;
    let worker = OfflineWorker::new(&config.worker, network, storage)?;
    log::info!(
        "Worker {} for {} (caches {} / {})",
        worker.id(),
        worker.origin(),
        worker.cache_names().static_name,
        worker.cache_names().dynamic_name
    );

    let state = Arc::new(ProxyState {
        registration: Registration::new(),
        origin: config.worker.origin_url()?,
        upstream,
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?,
    });

    match state.registration.install(worker).await {
        Ok(report) => log::info!("Worker install: {report:?}"),
        Err(e) => log::error!("Worker not installed, proxying without cache: {e}"),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/__worker/status", get(worker_status::<S>))
        .route("/__worker/message", post(worker_message::<S>))
        .fallback(proxy_request::<S>)
        .layer(cors)
        .with_state(Arc::clone(&state));

    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    log::info!(
        "Proxying {} on {}:{}",
        state.upstream,
        config.server.host,
        config.server.port
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.registration.flush().await;
    if let Some(worker) = state.registration.active().await {
        log::info!("Worker {}: {}", worker.id(), worker.stats().summary());
    }
    Ok(())
}

async fn worker_status<S: CacheStorage + 'static>(
    State(state): State<SharedState<S>>,
) -> impl IntoResponse {
    Json(state.registration.status().await)
}

async fn worker_message<S: CacheStorage + 'static>(
    State(state): State<SharedState<S>>,
    headers: HeaderMap,
    body: String,
) -> axum::response::Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let message = match WorkerMessage::parse(origin, &body) {
        Ok(message) => message,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.registration.post_message(&message).await {
        Ok(MessageOutcome::Rejected) => {
            let err = Error::UnauthorizedOrigin {
                origin: origin.to_string(),
            };
            (StatusCode::FORBIDDEN, err.to_string()).into_response()
        }
        Ok(outcome) => Json(serde_json::json!({ "outcome": outcome })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn proxy_request<S: CacheStorage + 'static>(
    State(state): State<SharedState<S>>,
    req: axum::extract::Request,
) -> axum::response::Response {
    let request = match to_worker_request(&state.origin, &req) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.registration.fetch(&request).await {
        Ok(FetchOutcome::Respond { response, source }) => {
            log::debug!("{} {} <- {source:?}", request.method, request.url);
            to_http_response(response)
        }
        Ok(FetchOutcome::Passthrough) => {
            let Some(target) = passthrough_target(&state.origin, &state.upstream, &request.url)
            else {
                log::warn!("Refusing to forward {} outside {}", request.url, state.origin);
                return (StatusCode::FORBIDDEN, "cross-origin target").into_response();
            };
            match forward(&state, target, req).await {
                Ok(resp) => resp,
                Err(e) => {
                    log::warn!("Passthrough {} failed: {e}", request.url);
                    (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
                }
            }
        }
        Err(e @ Error::NoFallback { .. }) => {
            (StatusCode::GATEWAY_TIMEOUT, e.to_string()).into_response()
        }
        Err(e) => {
            log::error!("Fetch {} failed: {e}", request.url);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Describes an incoming request the way a page would present it to the worker.
fn to_worker_request(origin: &Url, req: &axum::extract::Request) -> offline_worker::Result<Request> {
    let uri = req.uri();
    let parsed = if uri.scheme().is_some() {
        Url::parse(&uri.to_string())
    } else {
        origin.join(uri.path_and_query().map_or("/", |pq| pq.as_str()))
    };
    let url = parsed.map_err(|e| Error::InvalidUrl(format!("{uri}: {e}")))?;

    let headers = req.headers();
    let mut request = Request::from_url(url).with_method(offline_worker::Method::parse(
        req.method().as_str(),
    ));
    if let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        request = request.with_accept(accept);
    }
    if headers
        .get("sec-fetch-mode")
        .is_some_and(|v| v.as_bytes() == b"navigate")
    {
        request = request.with_mode(RequestMode::Navigate);
    }
    Ok(request)
}

fn to_http_response(response: Response) -> axum::response::Response {
    let mut builder = axum::http::Response::builder().status(response.status);
    for (name, value) in &response.headers {
        if !HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|e| (StatusCode::BAD_GATEWAY, e.to_string()).into_response())
}

/// Upstream URL for a passed-through request. Only the page origin is
/// proxied; any other host gets `None`.
fn passthrough_target(origin: &Url, upstream: &Url, url: &Url) -> Option<Url> {
    if url.origin() != origin.origin() {
        return None;
    }
    let mut target = upstream.clone();
    target.set_path(url.path());
    target.set_query(url.query());
    Some(target)
}

/// Sends a request the worker declined to handle straight to the upstream.
async fn forward<S: CacheStorage>(
    state: &ProxyState<S>,
    target: Url,
    req: axum::extract::Request,
) -> offline_worker::Result<axum::response::Response> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY)
        .await
        .map_err(|e| Error::Network(format!("request body: {e}")))?;

    let mut headers = parts.headers;
    for name in HOP_HEADERS {
        headers.remove(name);
    }

    let upstream = state
        .client
        .request(parts.method, target)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let mut builder = axum::http::Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if !HOP_HEADERS.contains(&name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    let bytes = upstream.bytes().await?;
    Ok(builder
        .body(Body::from(bytes))
        .unwrap_or_else(|e| (StatusCode::BAD_GATEWAY, e.to_string()).into_response()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
