use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::receive_agent_callback;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::{Hub, HubStats};
use crate::router::MessageRouter;
use crate::ws::ws_upgrade;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub router: Arc<MessageRouter>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/api/agent-response", post(agent_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    stats: HubStats,
}

#[derive(Serialize)]
struct AgentAck {
    status: &'static str,
    message: &'static str,
}

async fn index() -> Html<&'static str> {
    Html("<h1>Chat Server with AI Agent Integration</h1>")
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        stats: state.hub.stats().await,
    })
}

/// Callback from the agent service. The body is read raw so that the token
/// is checked before any parsing.
async fn agent_response(
    headers: HeaderMap,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AgentAck>, ServerError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    receive_agent_callback(
        &state.hub,
        &state.config.agent_service_secret,
        auth,
        &body,
    )
    .await?;

    Ok(Json(AgentAck {
        status: "success",
        message: "Agent response broadcasted",
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP and WebSocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use huddle_shared::protocol::{AgentRequest, ServerEvent};
    use tower::ServiceExt;

    use crate::agent::AgentDispatch;
    use crate::hub::drain;
    use crate::rate_limit::RateLimiter;

    struct NoAgent;

    impl AgentDispatch for NoAgent {
        fn dispatch(&self, _request: AgentRequest) {}
    }

    fn test_state() -> AppState {
        let config = ServerConfig {
            agent_service_secret: "test-secret".into(),
            ..Default::default()
        };
        let hub = Hub::new();
        let router = MessageRouter::new(
            hub.clone(),
            RateLimiter::new(),
            Arc::new(NoAgent),
            config.rate_limit_window_ms,
        );
        AppState {
            hub,
            router: Arc::new(router),
            config: Arc::new(config),
        }
    }

    fn callback(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/agent-response")
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_index() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Chat Server"));
    }

    #[tokio::test]
    async fn test_health_reports_connections() {
        let state = test_state();
        let (_conn, _rx) = state.hub.connect(Some("0xaaa".into())).await;
        let app = build_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 1);
        assert_eq!(body["identities"], 1);
        assert_eq!(body["rooms"], 1);
    }

    #[tokio::test]
    async fn test_agent_callback_accepted() {
        let state = test_state();
        let (_conn, mut rx) = state.hub.connect(None).await;
        drain(&mut rx);
        let app = build_router(state);

        let response = app
            .oneshot(callback(
                Some("Bearer test-secret"),
                r#"{"text":"42","agent_id":"ai_agent_001"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "success");

        match drain(&mut rx).as_slice() {
            [ServerEvent::ReceiveMessage(msg)] => {
                assert_eq!(msg.message, "42");
                assert_eq!(msg.author.as_deref(), Some("AI Agent"));
                assert_eq!(msg.author_id.as_deref(), Some("ai_agent_001"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_callback_unauthorized() {
        let state = test_state();
        let (_conn, mut rx) = state.hub.connect(None).await;
        drain(&mut rx);

        for auth in [None, Some("Bearer wrong")] {
            let app = build_router(state.clone());
            let response = app
                .oneshot(callback(auth, r#"{"text":"42","agent_id":"ai_agent_001"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(json_body(response).await["error"], "Invalid token");
        }
        assert!(drain(&mut rx).is_empty());
    }
}
