//! HTTP transport. Handlers only translate between axum extractors and
//! [`Gateway`] calls; no policy lives here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::gateway::{Gateway, HealthReport, RequestContext};
use crate::privacy::{AcceptedAck, AggregateSnapshot, TelemetryPayload};
use crate::protocol::{
    DotRequest, DotResponse, EncryptedQuery, EncryptedResult, FactCheckRequest,
    FactCheckResponse, ProofReceipt, SearchQuery, SearchResult, SummarizeRequest,
    SummaryResponse,
};

pub const API_KEY_HEADER: &str = "x-api-key";
const UNKNOWN_PEER: &str = "unknown";

type Shared = State<Arc<Gateway>>;
type Peer = Option<ConnectInfo<SocketAddr>>;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::MalformedInput | ErrorKind::InvalidCiphertext => StatusCode::BAD_REQUEST,
        ErrorKind::SchemeUninitialized => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::BackendUnavailable => StatusCode::BAD_GATEWAY,
        // Only backend result sets are sealed server side.
        ErrorKind::PayloadTooLarge => StatusCode::INTERNAL_SERVER_ERROR,
        // Epsilon only comes from server configuration, so callers cannot fix it.
        ErrorKind::InvalidEpsilon | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            warn!(error = %self, kind = kind.as_str(), "request failed");
        }
        let retry_after = match &self {
            GatewayError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let body = ErrorBody {
            error: kind,
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/query", post(submit_query))
        .route("/search", post(search))
        .route("/federated_update", post(federated_update))
        .route("/aggregate_updates", get(aggregate_updates))
        .route("/encrypted_dot", post(encrypted_dot))
        .route("/fact_check", post(fact_check))
        .route("/summarize", post(summarize))
        .route("/zkp_proof", post(zkp_proof))
        .route("/health", get(health))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().include_headers(false)),
        )
        .with_state(gateway)
}

/// Serves until Ctrl-C, sweeping stale rate-limit windows every `prune_every`.
pub async fn serve(
    gateway: Arc<Gateway>,
    bind: SocketAddr,
    prune_every: Duration,
) -> std::io::Result<()> {
    let pruner = tokio::spawn(prune_loop(gateway.clone(), prune_every));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "gateway listening");
    let outcome = axum::serve(
        listener,
        router(gateway).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;
    pruner.abort();
    info!("gateway stopped");
    outcome
}

async fn prune_loop(gateway: Arc<Gateway>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let dropped = gateway.prune_rate_limits(SystemTime::now());
        if dropped > 0 {
            debug!(dropped, "pruned stale rate-limit windows");
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "ctrl-c handler unavailable, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn context(headers: &HeaderMap, peer: Peer) -> RequestContext {
    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let identity = peer
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_PEER.to_owned());
    RequestContext::new(credential, identity)
}

/// Unwraps a JSON body. Undecodable bodies still pass the gate and limiter
/// first, so bad credentials see 401 rather than 400.
fn body<T>(
    gateway: &Gateway,
    ctx: &RequestContext,
    payload: Result<Json<T>, JsonRejection>,
) -> GatewayResult<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            gateway.admit(ctx)?;
            Err(GatewayError::MalformedInput(rejection_message(&rejection).into()))
        }
    }
}

// serde messages can quote the offending input, so they are not forwarded.
fn rejection_message(rejection: &JsonRejection) -> &'static str {
    match rejection {
        JsonRejection::JsonDataError(_) => "request body does not match the expected shape",
        JsonRejection::JsonSyntaxError(_) => "request body is not valid json",
        JsonRejection::MissingJsonContentType(_) => "expected content-type application/json",
        _ => "unreadable request body",
    }
}

async fn submit_query(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<EncryptedQuery>, JsonRejection>,
) -> GatewayResult<Json<EncryptedResult>> {
    let ctx = context(&headers, peer);
    let request = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.submit_query(&ctx, request).await?))
}

async fn search(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<SearchQuery>, JsonRejection>,
) -> GatewayResult<Json<SearchResult>> {
    let ctx = context(&headers, peer);
    let request = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.search(&ctx, request).await?))
}

async fn federated_update(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<TelemetryPayload>, JsonRejection>,
) -> GatewayResult<Json<AcceptedAck>> {
    let ctx = context(&headers, peer);
    let update = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.federated_update(&ctx, update)?))
}

async fn aggregate_updates(State(gateway): Shared) -> Json<AggregateSnapshot> {
    Json(gateway.aggregate())
}

async fn encrypted_dot(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<DotRequest>, JsonRejection>,
) -> GatewayResult<Json<DotResponse>> {
    let ctx = context(&headers, peer);
    let request = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.encrypted_dot(&ctx, request)?))
}

async fn fact_check(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<FactCheckRequest>, JsonRejection>,
) -> GatewayResult<Json<FactCheckResponse>> {
    let ctx = context(&headers, peer);
    let request = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.fact_check(&ctx, request)?))
}

async fn summarize(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> GatewayResult<Json<SummaryResponse>> {
    let ctx = context(&headers, peer);
    let request = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.summarize(&ctx, request)?))
}

async fn zkp_proof(
    State(gateway): Shared,
    peer: Peer,
    headers: HeaderMap,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> GatewayResult<Json<ProofReceipt>> {
    let ctx = context(&headers, peer);
    let request = body(&gateway, &ctx, payload)?;
    Ok(Json(gateway.zkp_proof(&ctx, request)?))
}

async fn health(State(gateway): Shared) -> Json<HealthReport> {
    Json(gateway.health())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_distinguish_failure_classes() {
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::BackendUnavailable), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::SchemeUninitialized),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(ErrorKind::InvalidCiphertext), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::PayloadTooLarge),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = GatewayError::RateLimited {
            retry_after: Duration::from_secs(120),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "120");
    }

    #[test]
    fn missing_peer_falls_back_to_unknown_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("k"));
        let ctx = context(&headers, None);
        assert_eq!(ctx.identity, UNKNOWN_PEER);
        assert_eq!(ctx.credential.as_deref(), Some("k"));
    }
}
