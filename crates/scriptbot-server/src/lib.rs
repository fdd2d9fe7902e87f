use std::net::SocketAddr;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use scriptbot_config::Config;
use scriptbot_contracts::WebhookBody;
use scriptbot_kernel::ScriptCatalog;
use tracing::{debug, info, warn};

pub mod chain;
pub mod devview;
pub mod engine;
pub mod messenger;
pub mod store;

use devview::{check_password, render_record, DevLogin, LOGIN_HTML};
use engine::{report_turn_error, Engine, EngineSettings};
use messenger::{normalize_webhook, verify_subscription, AuthError, MessengerClient, VerifyQuery};
use store::{StoreError, UserStore};

pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let state = AppState::new(cfg).await?;
    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/privacypolicy", get(privacy_policy))
        .route("/dev", get(dev_login_form).post(dev_view))
        .route("/dev/login", get(dev_login_form).post(dev_view))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    engine: Engine,
    store: UserStore,
    verify_token: String,
    dev_password: Option<String>,
    privacy_policy_path: Option<String>,
}

impl AppState {
    async fn new(cfg: Config) -> Result<Self, String> {
        let entries = scriptbot_config::load_script(&cfg.conversation.script_path)
            .map_err(|e| e.to_string())?;
        let catalog = ScriptCatalog::new(entries).map_err(|e| e.to_string())?;
        for issue in catalog.issues() {
            warn!(issue = ?issue, "script problem");
        }
        if !catalog.contains(&cfg.conversation.initial_trigger) {
            warn!(
                trigger = %cfg.conversation.initial_trigger,
                "initial trigger has no script entry"
            );
        }
        info!(entries = catalog.len(), "script loaded");

        let store = UserStore::from_config(&cfg.store).map_err(|e| e.to_string())?;
        let messenger = MessengerClient::new(&cfg.messenger)?;
        let engine = Engine::new(
            EngineSettings::from_config(&cfg),
            catalog,
            store.clone(),
            messenger,
        );
        Ok(Self {
            engine,
            store,
            verify_token: cfg.messenger.verify_token,
            dev_password: cfg.dev.password,
            privacy_policy_path: cfg.server.privacy_policy_path,
        })
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, String) {
    match verify_subscription(&query, &state.verify_token) {
        Ok(challenge) => {
            info!("webhook verified");
            (StatusCode::OK, challenge)
        }
        Err(err @ AuthError::MissingParams) => (StatusCode::BAD_REQUEST, err.to_string()),
        Err(err) => {
            warn!(error = %err, "webhook verification refused");
            (StatusCode::FORBIDDEN, err.to_string())
        }
    }
}

async fn receive_webhook(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> (StatusCode, &'static str) {
    let events = match normalize_webhook(body) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "webhook rejected");
            return (StatusCode::NOT_FOUND, "");
        }
    };
    for event in events {
        let sender_id = event.sender_id().to_string();
        match state.engine.handle_inbound(event).await {
            Ok(outcome) => debug!(sender_id = %sender_id, outcome = ?outcome, "turn finished"),
            Err(err) => report_turn_error(&sender_id, &err),
        }
    }
    (StatusCode::OK, EVENT_RECEIVED)
}

async fn privacy_policy(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let path = state
        .privacy_policy_path
        .as_deref()
        .ok_or(StatusCode::NOT_FOUND)?;
    match tokio::fs::read_to_string(path).await {
        Ok(html) => Ok(Html(html)),
        Err(err) => {
            warn!(path, error = %err, "privacy policy unreadable");
            Err(StatusCode::NOT_FOUND)
        }
    }
}

async fn dev_login_form() -> Html<&'static str> {
    Html(LOGIN_HTML)
}

async fn dev_view(
    State(state): State<AppState>,
    Form(login): Form<DevLogin>,
) -> Result<Html<String>, (StatusCode, String)> {
    if let Err(err) = check_password(state.dev_password.as_deref(), &login.password) {
        warn!(psid = %login.psid, "dev view refused");
        return Err((StatusCode::FORBIDDEN, err.to_string()));
    }
    info!(psid = %login.psid, "dev view rendered");
    match state.store.get_all(&login.psid).await {
        Ok(record) => Ok(Html(render_record(&record))),
        Err(err @ StoreError::NotFound(_)) => Err((StatusCode::NOT_FOUND, err.to_string())),
        Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}
