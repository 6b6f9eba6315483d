use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use runner::Intent;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::client::MessageSink;
use crate::commands::{self, Command};
use crate::protocol::Update;
use crate::session::{ConversationId, SessionManagerHandle};

const MAX_WEBHOOK_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManagerHandle,
    pub sink: Arc<dyn MessageSink>,
}

#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub max_inflight: usize,
    pub request_timeout: Duration,
}

pub fn build_router(state: AppState, limits: ServerLimits) -> Router {
    Router::new()
        .route("/healthz", get(healthcheck))
        .route(
            "/",
            post(webhook_handler).layer(
                ServiceBuilder::new()
                    .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES))
                    .layer(TimeoutLayer::with_status_code(
                        StatusCode::REQUEST_TIMEOUT,
                        limits.request_timeout,
                    )),
            ),
        )
        .layer(CompressionLayer::new())
        .layer(ConcurrencyLimitLayer::new(limits.max_inflight.max(1)))
        .layer(middleware::from_fn(log_request_response))
        .with_state(state)
}

async fn healthcheck() -> Response {
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn log_request_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

/// Always answers 200 so the provider does not redeliver; replies go out through the sink.
async fn webhook_handler(
    State(state): State<AppState>,
    Json(update): Json<Update>,
) -> &'static str {
    let Some(message) = update.message else {
        return "ok";
    };
    let chat_id = message.chat.id;
    let username = message
        .from
        .and_then(|user| user.username)
        .unwrap_or_else(|| "unknown".to_owned());
    info!(chat_id, %username, update_id = update.update_id, "inbound message");

    let Some(command) = message.text.as_deref().and_then(commands::parse) else {
        return "ok";
    };
    let outbound = match command {
        Command::Start => commands::WELCOME_TEXT.to_owned(),
        Command::Help => commands::HELP_TEXT.to_owned(),
        Command::About => commands::ABOUT_TEXT.to_owned(),
        Command::Policy => commands::POLICY_TEXT.to_owned(),
        Command::Converse(intent) => converse(&state, chat_id, intent).await,
    };

    if let Err(err) = state.sink.send_message(chat_id, &outbound).await {
        warn!(chat_id, error = %format!("{err:#}"), "failed to deliver reply");
    }
    "ok"
}

async fn converse(state: &AppState, chat_id: ConversationId, intent: Intent) -> String {
    match state.sessions.converse(chat_id, intent).await {
        Ok(reply) => commands::render_reply(&reply),
        Err(err) => {
            warn!(chat_id, kind = ?err.kind, message = %err.message, "session request failed");
            commands::render_session_error(&err)
        }
    }
}
