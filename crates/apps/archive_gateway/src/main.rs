use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use archive::{
    clear_cache, ensure_archive_cached, FsArchiveStore, HttpArchiveSource, Intercept,
    RangeInterceptor, ReadRequest,
};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use clap::Parser;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Gateway serving a cached tiled-geometry archive with byte-range
/// semantics, so the tile renderer works fully offline after first download.
#[derive(Debug, Parser)]
#[command(name = "archive_gateway")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:9200", env = "GATEWAY_ADDR")]
    addr: SocketAddr,

    /// Directory holding the durable archive cache.
    #[arg(long, default_value = "data/archive-cache", env = "GATEWAY_CACHE_DIR")]
    cache_dir: PathBuf,

    /// Archive identifier; the interceptor answers reads whose target
    /// matches this value.
    #[arg(long, env = "GATEWAY_ARCHIVE_ID")]
    archive_id: String,

    /// Origin URL the archive is downloaded from, and the proxy target for
    /// requests the interceptor declines.
    #[arg(long, env = "GATEWAY_ARCHIVE_URL")]
    archive_url: String,
}

#[derive(Clone)]
struct AppState {
    interceptor: &'static RangeInterceptor,
    store: Arc<Mutex<FsArchiveStore>>,
    archive_id: String,
    archive_url: String,
    http: reqwest::Client,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Install before anything issues reads; activation follows the cache
    // load below.
    let interceptor = RangeInterceptor::install();

    let mut store = FsArchiveStore::new(&args.cache_dir).expect("create archive cache dir");
    let http = reqwest::Client::new();
    let source = HttpArchiveSource::new(http.clone());

    let mut last_logged_pct = 0u64;
    let cached = ensure_archive_cached(
        &mut store,
        &source,
        &args.archive_id,
        &args.archive_url,
        |loaded, total| {
            if let Some(total) = total.filter(|t| *t > 0) {
                let pct = loaded * 100 / total;
                if pct >= last_logged_pct + 10 {
                    last_logged_pct = pct;
                    info!(loaded, total, pct, "archive download progress");
                }
            }
        },
    )
    .await;

    match cached {
        Ok(payload) => interceptor.activate_buffer(args.archive_id.clone(), payload),
        // Not fatal: the gateway still proxies; a restart retries the
        // download.
        Err(err) => warn!(error = %err, "archive unavailable, serving pass-through only"),
    }

    let state = AppState {
        interceptor,
        store: Arc::new(Mutex::new(store)),
        archive_id: args.archive_id,
        archive_url: args.archive_url,
        http,
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/archive", get(get_archive))
        .route("/cache", delete(delete_cache))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("archive gateway listening on http://{}", args.addr);
    axum::serve(
        tokio::net::TcpListener::bind(args.addr).await.unwrap(),
        app,
    )
    .await
    .unwrap();
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn get_archive(State(state): State<AppState>, method: Method, headers: HeaderMap) -> Response {
    let range = headers
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = ReadRequest {
        method: method.clone(),
        url: state.archive_id.clone(),
        range,
    };

    match state.interceptor.answer(&request) {
        Intercept::Served(resp) => {
            (resp.status, resp.headers, Body::from(resp.body)).into_response()
        }
        Intercept::PassThrough => proxy(&state, method, &headers).await,
    }
}

async fn delete_cache(State(state): State<AppState>) -> Response {
    let mut store = state.store.lock().await;
    match clear_cache(&mut *store, Some(&state.archive_id)) {
        Ok(()) => {
            state.interceptor.deactivate();
            info!(archive_id = state.archive_id, "archive cache cleared");
            (StatusCode::NO_CONTENT, "").into_response()
        }
        Err(err) => {
            error!(error = %err, "cache clear failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "cache clear failed").into_response()
        }
    }
}

async fn proxy(state: &AppState, method: Method, headers: &HeaderMap) -> Response {
    let mut req = state.http.request(method, &state.archive_url);
    if let Some(range) = headers.get(http::header::RANGE) {
        req = req.header(http::header::RANGE, range.clone());
    }
    match req.send().await {
        Ok(resp) => map_proxy_response(resp).await,
        Err(err) => {
            error!(error = %err, "origin request failed");
            (StatusCode::BAD_GATEWAY, "archive origin unavailable").into_response()
        }
    }
}

async fn map_proxy_response(resp: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for name in [
        http::header::CONTENT_TYPE,
        http::header::CONTENT_LENGTH,
        http::header::CONTENT_RANGE,
        http::header::ACCEPT_RANGES,
    ] {
        if let Some(value) = resp.headers().get(&name) {
            headers.insert(
                name,
                HeaderValue::from_bytes(value.as_bytes())
                    .unwrap_or_else(|_| HeaderValue::from_static("")),
            );
        }
    }

    match resp.bytes().await {
        Ok(bytes) => (status, headers, Body::from(bytes)).into_response(),
        Err(err) => {
            error!(error = %err, "origin response read failed");
            (StatusCode::BAD_GATEWAY, "archive origin unavailable").into_response()
        }
    }
}
