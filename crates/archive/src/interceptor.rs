use std::sync::RwLock;

use bytes::Bytes;
use http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::range::{RangeOutcome, content_range, parse_range, unsatisfiable_content_range};

/// A read-style request the interceptor may answer locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub method: Method,
    pub url: String,
    /// Raw `Range` header value, if any.
    pub range: Option<String>,
}

/// Response served from the materialized archive copy.
#[derive(Debug, Clone)]
pub struct ServedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Outcome of consulting the interceptor for a request.
#[derive(Debug, Clone)]
pub enum Intercept {
    Served(ServedResponse),
    /// Not ours (or not parseable as a local range read): the caller sends
    /// the request to the real network path unmodified.
    PassThrough,
}

#[derive(Debug)]
struct ActiveArchive {
    archive_id: String,
    payload: Bytes,
}

static INSTALLED: OnceCell<RangeInterceptor> = OnceCell::new();

/// Answers reads of the cached archive from memory, emulating full-file and
/// partial-content byte-range semantics so an unmodified tile renderer
/// cannot tell local serving from a real origin.
///
/// Initialization order: `install()` must run before any part of the system
/// issues reads; `activate_buffer` follows the first successful cache load.
/// Until activation every request passes through.
#[derive(Debug, Default)]
pub struct RangeInterceptor {
    active: RwLock<Option<ActiveArchive>>,
}

impl RangeInterceptor {
    /// A scoped instance, for tests and embedded use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide install. Idempotent: every call returns the same
    /// instance, and an already-activated buffer is left alone.
    pub fn install() -> &'static RangeInterceptor {
        INSTALLED.get_or_init(|| {
            info!("range interceptor installed");
            RangeInterceptor::new()
        })
    }

    /// Make a downloaded archive available for local serving. At most one
    /// archive is active at a time; activating replaces the previous buffer.
    pub fn activate_buffer(&self, archive_id: impl Into<String>, payload: Bytes) {
        let archive_id = archive_id.into();
        info!(archive_id, bytes = payload.len(), "archive buffer activated");
        *self.active.write().expect("interceptor lock") = Some(ActiveArchive {
            archive_id,
            payload,
        });
    }

    /// Drop the active buffer (after an explicit cache clear); subsequent
    /// reads pass through to the network.
    pub fn deactivate(&self) {
        *self.active.write().expect("interceptor lock") = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.read().expect("interceptor lock").is_some()
    }

    /// Answer a read request from the active buffer, or decline.
    pub fn answer(&self, request: &ReadRequest) -> Intercept {
        let guard = self.active.read().expect("interceptor lock");
        let Some(active) = guard.as_ref() else {
            return Intercept::PassThrough;
        };
        if request.url != active.archive_id {
            return Intercept::PassThrough;
        }

        let total = active.payload.len() as u64;
        match request.method {
            Method::HEAD => Intercept::Served(ServedResponse {
                status: StatusCode::OK,
                headers: base_headers(total),
                body: Bytes::new(),
            }),
            Method::GET => match &request.range {
                None => Intercept::Served(ServedResponse {
                    status: StatusCode::OK,
                    headers: base_headers(total),
                    body: active.payload.clone(),
                }),
                Some(raw) => match parse_range(raw, total) {
                    Some(RangeOutcome::Satisfiable { start, end }) => {
                        let slice = active
                            .payload
                            .slice(start as usize..(end as usize + 1));
                        let mut headers = base_headers(slice.len() as u64);
                        headers.insert(
                            CONTENT_RANGE,
                            header_value(&content_range(start, end, total)),
                        );
                        Intercept::Served(ServedResponse {
                            status: StatusCode::PARTIAL_CONTENT,
                            headers,
                            body: slice,
                        })
                    }
                    Some(RangeOutcome::Unsatisfiable) => {
                        let mut headers = base_headers(0);
                        headers.insert(
                            CONTENT_RANGE,
                            header_value(&unsatisfiable_content_range(total)),
                        );
                        Intercept::Served(ServedResponse {
                            status: StatusCode::RANGE_NOT_SATISFIABLE,
                            headers,
                            body: Bytes::new(),
                        })
                    }
                    None => {
                        // Protocol mismatch: let the real network answer it.
                        debug!(range = raw, "unparsable range spec, passing through");
                        Intercept::PassThrough
                    }
                },
            },
            _ => Intercept::PassThrough,
        }
    }
}

fn base_headers(content_length: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, header_value(&content_length.to_string()));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}
