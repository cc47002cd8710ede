//! AURA Gateway: serves voice sessions over WebSocket.
//!
//! Collaborators are the placeholder backends from `aura-voice`, so a client
//! can exercise the whole turn-taking loop (VAD, barge-in, sentence streaming)
//! without any hosted provider.

mod ws;

use async_trait::async_trait;
use aura_voice::{
    Collaborators, EchoGenerator, InMemorySessionStore, PlaceholderStt, PlaceholderTts,
    SessionRegistry, StaticContextProvider, TurnObserver, TurnRecord, VoiceConfig,
    VoiceOrchestrator,
};
use axum::{extract::State, http::Method, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 8000;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: VoiceOrchestrator,
    pub started_at: DateTime<Utc>,
}

/// Logs each completed turn. Stands in for memory/persona refresh.
struct TurnLogger;

#[async_trait]
impl TurnObserver for TurnLogger {
    async fn on_turn(&self, record: TurnRecord) {
        tracing::debug!(
            session_id = %record.session_id,
            user_id = %record.user_id,
            user_chars = record.user_text.len(),
            assistant_chars = record.assistant_text.len(),
            "Turn completed"
        );
    }
}

fn placeholder_collaborators() -> Collaborators {
    let stt = match std::env::var("AURA_PLACEHOLDER_TRANSCRIPT") {
        Ok(text) if !text.trim().is_empty() => PlaceholderStt::with_response(text),
        _ => PlaceholderStt::new(),
    };
    Collaborators::new(
        Arc::new(stt),
        Arc::new(EchoGenerator::with_delay(Duration::from_millis(40))),
        Arc::new(PlaceholderTts::new()),
    )
    .with_context_provider(Arc::new(StaticContextProvider::new()))
    .with_session_store(Arc::new(InMemorySessionStore::new()))
    .with_turn_observer(Arc::new(TurnLogger))
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .route("/ws/voice", get(ws::ws_voice_handler))
        .layer(cors)
        .with_state(state)
}

/// GET /health – liveness check with the live session count.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(serde_json::json!({
        "status": "ok",
        "service": "aura-gateway",
        "active_sessions": state.orchestrator.registry().len(),
        "uptime_secs": uptime,
    }))
}

/// GET /sessions – active sessions, oldest first.
async fn sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state.orchestrator.registry().snapshot();
    Json(serde_json::json!({
        "count": active.len(),
        "sessions": active,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[aura-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = VoiceConfig::load()?;
    tracing::info!(
        classifier = ?config.vad.classifier,
        sample_rate = config.vad.sample_rate,
        frame_ms = config.vad.frame_ms,
        interruptions = config.session.allow_interruptions,
        "Voice config loaded"
    );

    let orchestrator =
        VoiceOrchestrator::new(config, placeholder_collaborators(), SessionRegistry::new());
    let app = build_app(AppState {
        orchestrator,
        started_at: Utc::now(),
    });

    let port = std::env::var("AURA_GATEWAY_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("AURA gateway listening on {}", addr);

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown initiated (Ctrl+C received)");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_voice::{ConversationSession, SessionInfo};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            orchestrator: VoiceOrchestrator::new(
                VoiceConfig::default(),
                placeholder_collaborators(),
                SessionRegistry::new(),
            ),
            started_at: Utc::now(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn health_reports_active_sessions() {
        let state = test_state();
        let (status, json) = get_json(build_app(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["active_sessions"], 0);
    }

    #[tokio::test]
    async fn sessions_lists_registered_sessions() {
        let state = test_state();
        let info: SessionInfo = ConversationSession::new("alice", Some("clinic".into()), 10).info();
        let _guard = state.orchestrator.registry().register(info.clone());

        let (status, json) = get_json(build_app(state.clone()), "/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 1);
        assert_eq!(json["sessions"][0]["session_id"], info.session_id.as_str());
        assert_eq!(json["sessions"][0]["tenant_id"], "clinic");
    }

    #[tokio::test]
    async fn voice_route_requires_websocket_upgrade() {
        let (status, _) = get_json(build_app(test_state()), "/ws/voice?user_id=u1").await;
        assert!(status.is_client_error());
    }
}
