//! Request metrics for the HTTP surface.
//!
//! Every request is counted and timed per matched route. Routes are also
//! grouped into a [`RouteKind`] so synchronous refreshes, which hold the
//! connection for the whole engine commit, can be told apart from queued
//! submissions and status polls.

use axum::extract::MatchedPath;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info_span, Instrument};

const TABULAR_PREFIX: &str = "/api/v1/tabular/";

/// Coarse grouping of API routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteKind {
    /// Refresh committed before the response
    Refresh,
    /// Job queued for the worker
    Submit,
    /// Partition creation, merge, repartition, or existence check
    Structure,
    /// Job status lookup
    Status,
    /// Health, readiness, unmatched paths
    Other,
}

impl RouteKind {
    pub(crate) fn classify(method: &Method, route: &str) -> Self {
        let Some(rest) = route.strip_prefix(TABULAR_PREFIX) else {
            return Self::Other;
        };
        if rest.starts_with("status/") {
            Self::Status
        } else if rest.ends_with("/process/async") {
            Self::Submit
        } else if rest.ends_with("/process") && method == Method::POST {
            Self::Refresh
        } else {
            Self::Structure
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::Submit => "submit",
            Self::Structure => "structure",
            Self::Status => "status",
            Self::Other => "other",
        }
    }
}

/// Database segment of a concrete request path, when the route carries one.
pub(crate) fn database_of(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(TABULAR_PREFIX)?;
    let db = rest.split('/').next()?;
    (!db.is_empty() && db != "status").then_some(db)
}

struct HttpInstruments {
    requests: Counter<u64>,
    duration_seconds: Histogram<f64>,
    errors: Counter<u64>,
    refresh_duration_seconds: Histogram<f64>,
}

fn instruments() -> &'static HttpInstruments {
    static INSTRUMENTS: OnceLock<HttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("tabulon.api.http");
        HttpInstruments {
            requests: meter
                .u64_counter("http.server.request.count")
                .with_description("HTTP requests handled by the Tabulon API")
                .init(),
            duration_seconds: meter
                .f64_histogram("http.server.request.duration")
                .with_description("HTTP request duration")
                .with_unit("s")
                .init(),
            errors: meter
                .u64_counter("http.server.request.errors")
                .with_description("HTTP requests answered with 4xx/5xx")
                .init(),
            refresh_duration_seconds: meter
                .f64_histogram("tabulon.refresh.sync.duration")
                .with_description("Synchronous refresh duration per database")
                .with_unit("s")
                .init(),
        }
    })
}

/// Records request count, duration, and error responses per matched route.
pub async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let kind = RouteKind::classify(&method, &route);
    let database = database_of(req.uri().path()).map(str::to_string);

    let span = info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %method,
        http.route = %route,
        tabulon.route_kind = kind.as_str(),
        tabulon.database = database.as_deref().unwrap_or("")
    );
    let response = next.run(req).instrument(span).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed().as_secs_f64();
    let attrs = [
        KeyValue::new("http.request.method", method.as_str().to_string()),
        KeyValue::new("http.route", route),
        KeyValue::new("http.response.status_code", status as i64),
        KeyValue::new("tabulon.route_kind", kind.as_str()),
    ];
    let instruments = instruments();
    instruments.requests.add(1, &attrs);
    instruments.duration_seconds.record(elapsed, &attrs);
    if status >= 400 {
        instruments.errors.add(1, &attrs);
    }
    if kind == RouteKind::Refresh {
        if let Some(database) = database {
            instruments
                .refresh_duration_seconds
                .record(elapsed, &[KeyValue::new("tabulon.database", database)]);
        }
    }

    response
}
