//! HTTP/WebSocket server wiring: the `/health` and `/ws` routes, and the
//! shared-secret check gating the WebSocket upgrade.
//!
//! `Router` + `.with_state()`, an upgrade handler pulling
//! `WebSocketUpgrade`/`HeaderMap`/`ConnectInfo<SocketAddr>`/`State` and
//! calling `ws.on_upgrade(...)`, a health handler reporting connection
//! count, and a plain `TcpListener::bind` + `axum::serve` startup path.
//! Slimmed to what an adapter-facing gateway needs: no CORS/CSWSH handling
//! (adapters are not browsers), no TLS termination (left to a reverse
//! proxy), no auth/webauthn/pairing layers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tracing::info;

use crate::state::GatewayState;
use crate::ws::{self, ConnectionRuntime};

#[derive(Clone)]
struct AppState {
    runtime: ConnectionRuntime,
}

/// Build the gateway's `Router`, ready to serve or to mount under a test
/// harness.
pub fn build_app(runtime: ConnectionRuntime) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .with_state(AppState { runtime })
}

/// Bind `addr` and serve the gateway until the process is terminated.
pub async fn start_gateway(addr: SocketAddr, runtime: ConnectionRuntime) -> anyhow::Result<()> {
    let app = build_app(runtime);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway: listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gateway: &Arc<GatewayState> = &state.runtime.state;
    Json(serde_json::json!({
        "status": "ok",
        "connections": gateway.client_count().await,
        "uptime_secs": gateway.uptime_secs(),
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if !shared_secret_authenticated(&headers, state.runtime.state.shared_secret.as_deref()) {
        record_auth_rejected();
        return (StatusCode::UNAUTHORIZED, "invalid or missing gateway secret").into_response();
    }

    ws.on_upgrade(move |socket| ws::handle_connection(socket, state.runtime, addr))
        .into_response()
}

/// Checks the `Authorization: Bearer <secret>` header against the
/// configured shared secret. A gateway run without a configured secret
/// accepts every connection (local/dev use).
fn shared_secret_authenticated(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

#[cfg(feature = "metrics")]
fn record_auth_rejected() {
    clara_metrics::counter!(clara_metrics::gateway::AUTH_REJECTED_TOTAL).increment(1);
}
#[cfg(not(feature = "metrics"))]
fn record_auth_rejected() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_configured_secret_allows_every_connection() {
        let headers = HeaderMap::new();
        assert!(shared_secret_authenticated(&headers, None));
    }

    #[test]
    fn mismatched_bearer_token_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!shared_secret_authenticated(&headers, Some("right")));
    }

    #[test]
    fn matching_bearer_token_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer right".parse().unwrap());
        assert!(shared_secret_authenticated(&headers, Some("right")));
    }
}
