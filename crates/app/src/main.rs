use std::sync::Arc;

use app::client::TelegramClient;
use app::config::AppConfig;
use app::server::{AppState, ServerLimits, build_router};
use app::session::{SessionConfig, spawn_session_manager};
use app::telemetry::init_tracing;
use runner::{DenylistPolicy, Pipeline, PythonSandbox};
use tracing::info;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    let config = AppConfig::from_env()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    rt.block_on(async move {
        let sandbox = PythonSandbox::new(config.sandbox.clone());
        info!(
            runtime = sandbox.config().runtime.label(),
            timeout_ms = sandbox.config().timeout.as_millis() as u64,
            max_output_chars = sandbox.config().max_output_chars,
            "sandbox configured"
        );
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(DenylistPolicy::default()),
            Arc::new(sandbox),
        ));
        let sessions = spawn_session_manager(
            SessionConfig {
                max_sessions: config.max_sessions,
                ingress_capacity: config.ingress_capacity,
            },
            pipeline,
        );
        let state = AppState {
            sessions,
            sink: Arc::new(TelegramClient::new(&config.api_base, &config.bot_token)),
        };
        let app = build_router(
            state,
            ServerLimits {
                max_inflight: config.max_inflight,
                request_timeout: config.request_timeout,
            },
        );

        let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
        info!(addr = %config.bind_addr, "listening");
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
