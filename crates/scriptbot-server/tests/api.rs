use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use scriptbot_config::{Config, Conversation, Crypto, Dev, Messenger, Server, Store};
use scriptbot_server::build_app;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;

const PAGE_ID: &str = "PAGE";
const HELP: &str = "Type help to see this again.";
const CHAIN_DELAY_MS: u64 = 100;

#[derive(Clone, Default)]
struct SendLog {
    sends: Arc<Mutex<Vec<(Instant, Value)>>>,
    tokens: Arc<Mutex<Vec<String>>>,
    /// Delay before each reply; arrival is recorded first.
    latency: Duration,
    /// Status and optional JSON body returned instead of a success.
    failure: Option<(StatusCode, Option<Value>)>,
}

impl SendLog {
    async fn texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .await
            .iter()
            .map(|(_, body)| body["message"]["text"].as_str().unwrap_or("").to_string())
            .collect()
    }

    async fn wait_for(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.sends.lock().await.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for {count} sends");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn mock_send(
    State(log): State<SendLog>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    log.tokens
        .lock()
        .await
        .push(query.get("access_token").cloned().unwrap_or_default());
    let recipient = body["recipient"]["id"].clone();
    log.sends.lock().await.push((Instant::now(), body));
    if !log.latency.is_zero() {
        tokio::time::sleep(log.latency).await;
    }
    match &log.failure {
        Some((status, Some(body))) => (*status, Json(body.clone())).into_response(),
        Some((status, None)) => (*status).into_response(),
        None => Json(json!({"recipient_id": recipient, "message_id": "mid.1"})).into_response(),
    }
}

async fn start_send_api() -> (String, SendLog) {
    serve_send_api(SendLog::default()).await
}

async fn serve_send_api(log: SendLog) -> (String, SendLog) {
    let app = Router::new()
        .route("/me/messages", post(mock_send))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/me/messages"), log)
}

fn temp_path(label: &str, ext: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("scriptbot-{label}-{nanos}.{ext}"))
        .to_string_lossy()
        .to_string()
}

fn write_script() -> String {
    let path = temp_path("script", "json");
    let script = json!({"script entries": [
        {"status": "INIT_0", "response": {"message": {"text": "Welcome!"}}},
        {"status": "ONBOARD", "response": {"message": {"text": "What should I call you?"}},
         "next_status": "UPDATE_NAME-NAMED"},
        {"status": "NAMED", "response": {"message": {"text": "Nice to meet you /NAME/. What is one goal?"}},
         "next_status": "ADD_GOAL-CHECK_IN"},
        {"status": "CHECK_IN", "response": {"message": {"text": "Hi /NAME/, your goal /GOAL/ is going well"}}},
        {"status": "A", "response": {"message": {"text": "a"}}, "next_status": "B"},
        {"status": "B", "response": {"message": {"text": "b"}}, "next_status": "C"},
        {"status": "C", "response": {"message": {"text": "c"}}},
        {"status": "ASK", "response": {"message": {
            "text": "Pick one",
            "quick_replies": [
                {"content_type": "text", "title": "Go", "payload": "C"}
            ]
        }}},
        {"status": "BROKEN", "response": {"message": {"text": "broken"}}, "next_status": "SING_SONG-C"}
    ]});
    std::fs::write(&path, serde_json::to_vec(&script).unwrap()).unwrap();
    path
}

fn test_config(send_api_url: &str) -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
            privacy_policy_path: None,
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
        },
        messenger: Messenger {
            page_id: PAGE_ID.to_string(),
            verify_token: "verify-me".to_string(),
            page_access_token: "page-token".to_string(),
            send_api_url: send_api_url.to_string(),
            timeout_ms: 2_000,
        },
        conversation: Conversation {
            script_path: write_script(),
            initial_trigger: "INIT_0".to_string(),
            chain_delay_ms: CHAIN_DELAY_MS,
            help_text: HELP.to_string(),
        },
        crypto: Crypto {
            salt: "DSE".to_string(),
        },
        dev: Dev {
            password: Some("dev-pass".to_string()),
        },
    }
}

fn envelope(sender: &str, event: Value) -> Value {
    let mut messaging = json!({"sender": {"id": sender}, "recipient": {"id": PAGE_ID}});
    if let (Some(target), Some(fields)) = (messaging.as_object_mut(), event.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    json!({"object": "page", "entry": [{"id": PAGE_ID, "messaging": [messaging]}]})
}

fn postback(sender: &str, payload: &str) -> Value {
    envelope(sender, json!({"postback": {"payload": payload, "title": "tap"}}))
}

fn text(sender: &str, text: &str) -> Value {
    envelope(sender, json!({"message": {"mid": "m1", "text": text}}))
}

async fn post_webhook(app: &Router, body: Value) -> StatusCode {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).to_string())
}

async fn dev_view(app: &Router, psid: &str, password: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/dev")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(format!("psid={psid}&password={password}")))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&body).to_string())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(CHAIN_DELAY_MS * 4)).await;
}

/// Creates the user document through the initial trigger.
async fn start(app: &Router, log: &SendLog, user: &str) -> usize {
    assert_eq!(post_webhook(app, postback(user, "INIT_0")).await, StatusCode::OK);
    log.sends.lock().await.len()
}

#[tokio::test]
async fn healthz_ok() {
    let (url, _log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    let (status, body) = get(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn verification_handshake() {
    let (url, _log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();

    let (status, body) = get(
        &app,
        "/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=CHALLENGE_ACCEPTED",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "CHALLENGE_ACCEPTED");

    let (status, _) = get(
        &app,
        "/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=x",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(&app, "/webhook?hub.challenge=x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_page_webhook_is_not_found() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    let status = post_webhook(&app, json!({"object": "instagram", "entry": []})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(log.sends.lock().await.is_empty());
}

#[tokio::test]
async fn chained_entries_are_sent_in_order_with_delay() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    let offset = start(&app, &log, "u-chain").await;

    assert_eq!(post_webhook(&app, postback("u-chain", "A")).await, StatusCode::OK);
    log.wait_for(offset + 3).await;
    settle().await;

    let sends = log.sends.lock().await.clone();
    assert_eq!(sends.len(), offset + 3);
    let texts: Vec<&str> = sends[offset..]
        .iter()
        .map(|(_, body)| body["message"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
    for pair in sends[offset..].windows(2) {
        assert!(pair[1].0.duration_since(pair[0].0) >= Duration::from_millis(CHAIN_DELAY_MS));
    }
    assert!(sends
        .iter()
        .all(|(_, body)| body["recipient"]["id"] == "u-chain"));
    assert!(log.tokens.lock().await.iter().all(|t| t == "page-token"));
}

#[tokio::test]
async fn typed_input_is_captured_and_rendered() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-ava").await;

    post_webhook(&app, postback("u-ava", "ONBOARD")).await;
    log.wait_for(2).await;
    settle().await;
    assert_eq!(log.sends.lock().await.len(), 2);
    let (_, page) = dev_view(&app, "u-ava", "dev-pass").await;
    assert!(page.contains("UPDATE_NAME-NAMED"));

    post_webhook(&app, text("u-ava", "Ava")).await;
    log.wait_for(3).await;
    post_webhook(&app, text("u-ava", "run 5k")).await;
    log.wait_for(4).await;
    settle().await;

    let texts = log.texts().await;
    assert_eq!(
        texts,
        vec![
            "Welcome!",
            "What should I call you?",
            "Nice to meet you Ava. What is one goal?",
            "Hi Ava, your goal run 5k is going well",
        ]
    );

    let (status, page) = dev_view(&app, "u-ava", "dev-pass").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("<p>CHECK_IN</p>"));
    assert!(page.contains("<p>goals:</p><p>1</p>"));
    assert!(!page.contains("Ava"));
}

#[tokio::test]
async fn help_keyword_wins_over_pending_input() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-help").await;
    post_webhook(&app, postback("u-help", "ONBOARD")).await;
    log.wait_for(2).await;

    post_webhook(&app, text("u-help", "please HELP me")).await;
    log.wait_for(3).await;
    assert_eq!(log.texts().await[2], HELP);

    let (_, page) = dev_view(&app, "u-help", "dev-pass").await;
    assert!(page.contains("<p>UPDATE_NAME-NAMED</p>"));
    assert!(page.contains("<p>Name:</p><p></p>"));
}

#[tokio::test]
async fn delete_keyword_gets_help_and_keeps_pending_input() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-del").await;
    post_webhook(&app, postback("u-del", "ONBOARD")).await;
    log.wait_for(2).await;
    post_webhook(&app, text("u-del", "Ava")).await;
    log.wait_for(3).await;

    post_webhook(&app, text("u-del", "Delete my goals")).await;
    log.wait_for(4).await;
    settle().await;
    let texts = log.texts().await;
    assert_eq!(texts.len(), 4);
    assert_eq!(texts[3], HELP);

    let (_, page) = dev_view(&app, "u-del", "dev-pass").await;
    assert!(page.contains("<p>ADD_GOAL-CHECK_IN</p>"));
    assert!(page.contains("<p>goals:</p><p>0</p>"));
}

#[tokio::test]
async fn free_text_without_pending_input_gets_help() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-idle").await;

    post_webhook(&app, text("u-idle", "hello there")).await;
    log.wait_for(2).await;
    settle().await;
    assert_eq!(log.texts().await, vec!["Welcome!", HELP]);

    let (_, page) = dev_view(&app, "u-idle", "dev-pass").await;
    assert!(page.contains("<p>INIT_0</p>"));
}

#[tokio::test]
async fn unknown_action_degrades_to_help() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-broken").await;

    post_webhook(&app, postback("u-broken", "BROKEN")).await;
    log.wait_for(2).await;
    post_webhook(&app, text("u-broken", "la la la")).await;
    log.wait_for(3).await;
    assert_eq!(log.texts().await, vec!["Welcome!", "broken", HELP]);

    let (_, page) = dev_view(&app, "u-broken", "dev-pass").await;
    assert!(page.contains("<p>SING_SONG-C</p>"));
}

#[tokio::test]
async fn own_page_events_are_ignored() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();

    assert_eq!(post_webhook(&app, postback(PAGE_ID, "INIT_0")).await, StatusCode::OK);
    assert_eq!(post_webhook(&app, text(PAGE_ID, "help")).await, StatusCode::OK);
    settle().await;
    assert!(log.sends.lock().await.is_empty());

    let (status, _) = dev_view(&app, PAGE_ID, "dev-pass").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn echoes_are_dropped_and_quick_replies_become_postbacks() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-qr").await;

    post_webhook(
        &app,
        envelope("u-qr", json!({"message": {"text": "help", "is_echo": true}})),
    )
    .await;
    post_webhook(&app, postback("u-qr", "ASK")).await;
    log.wait_for(2).await;
    {
        let sends = log.sends.lock().await;
        assert_eq!(sends[1].1["message"]["quick_replies"][0]["payload"], "C");
    }

    post_webhook(
        &app,
        envelope(
            "u-qr",
            json!({"message": {"text": "Go", "quick_reply": {"payload": "C"}}}),
        ),
    )
    .await;
    log.wait_for(3).await;
    settle().await;
    assert_eq!(log.texts().await, vec!["Welcome!", "Pick one", "c"]);
}

#[tokio::test]
async fn new_inbound_cancels_pending_chain() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-cancel").await;

    post_webhook(&app, postback("u-cancel", "A")).await;
    post_webhook(&app, postback("u-cancel", "C")).await;
    log.wait_for(3).await;
    settle().await;
    assert_eq!(log.texts().await, vec!["Welcome!", "a", "c"]);
}

#[tokio::test]
async fn inbound_during_chained_send_stops_the_chain() {
    let (url, log) = serve_send_api(SendLog {
        latency: Duration::from_millis(300),
        ..SendLog::default()
    })
    .await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-race").await;

    post_webhook(&app, postback("u-race", "A")).await;
    // B fires after the chain delay and is still waiting on its send.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(log.texts().await, vec!["Welcome!", "a", "b"]);
    post_webhook(&app, postback("u-race", "ASK")).await;

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(log.texts().await, vec!["Welcome!", "a", "b", "Pick one"]);
    let (_, page) = dev_view(&app, "u-race", "dev-pass").await;
    assert!(page.contains("<p>ASK</p>"));
}

#[tokio::test]
async fn inbound_during_a_turn_send_prevents_its_chain() {
    let (url, log) = serve_send_api(SendLog {
        latency: Duration::from_millis(300),
        ..SendLog::default()
    })
    .await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-overtake").await;

    let first = tokio::spawn({
        let app = app.clone();
        async move { post_webhook(&app, postback("u-overtake", "A")).await }
    });
    log.wait_for(2).await;
    post_webhook(&app, postback("u-overtake", "ASK")).await;
    assert_eq!(first.await.unwrap(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(log.texts().await, vec!["Welcome!", "a", "Pick one"]);
    let (_, page) = dev_view(&app, "u-overtake", "dev-pass").await;
    assert!(page.contains("<p>ASK</p>"));
}

/// A failed send neither chains a simple next status nor writes a compound one.
async fn assert_failed_send_does_not_advance(failure: (StatusCode, Option<Value>)) {
    let (url, log) = serve_send_api(SendLog {
        failure: Some(failure),
        ..SendLog::default()
    })
    .await;
    let app = build_app(test_config(&url)).await.unwrap();
    assert_eq!(start(&app, &log, "u-down").await, 1);

    assert_eq!(post_webhook(&app, postback("u-down", "A")).await, StatusCode::OK);
    settle().await;
    assert_eq!(log.texts().await, vec!["Welcome!", "a"]);
    let (_, page) = dev_view(&app, "u-down", "dev-pass").await;
    assert!(page.contains("<p>A</p>"));

    assert_eq!(post_webhook(&app, postback("u-down", "ONBOARD")).await, StatusCode::OK);
    settle().await;
    assert_eq!(log.sends.lock().await.len(), 3);
    let (_, page) = dev_view(&app, "u-down", "dev-pass").await;
    assert!(page.contains("<p>ONBOARD</p>"));
    assert!(!page.contains("UPDATE_NAME-NAMED"));
}

#[tokio::test]
async fn platform_error_body_stops_the_turn() {
    assert_failed_send_does_not_advance((
        StatusCode::OK,
        Some(json!({"error": {"message": "(#100) No matching user found", "code": 100}})),
    ))
    .await;
}

#[tokio::test]
async fn http_error_stops_the_turn() {
    assert_failed_send_does_not_advance((StatusCode::INTERNAL_SERVER_ERROR, None)).await;
}

#[tokio::test]
async fn unknown_user_text_sends_nothing() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();

    assert_eq!(post_webhook(&app, text("ghost", "hi")).await, StatusCode::OK);
    assert_eq!(post_webhook(&app, postback("ghost", "A")).await, StatusCode::OK);
    settle().await;
    assert!(log.sends.lock().await.is_empty());
}

#[tokio::test]
async fn dev_view_requires_password() {
    let (url, log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    start(&app, &log, "u-dev").await;

    let (status, form) = get(&app, "/dev/login").await;
    assert_eq!(status, StatusCode::OK);
    assert!(form.contains("name=\"psid\""));

    let (status, _) = dev_view(&app, "u-dev", "nope").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, page) = dev_view(&app, "u-dev", "dev-pass").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("<p>u-dev</p>"));

    let mut cfg = test_config(&url);
    cfg.dev.password = None;
    let locked = build_app(cfg).await.unwrap();
    let (status, _) = dev_view(&locked, "u-dev", "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn privacy_policy_is_served_when_configured() {
    let (url, _log) = start_send_api().await;
    let app = build_app(test_config(&url)).await.unwrap();
    let (status, _) = get(&app, "/privacypolicy").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let path = temp_path("privacy", "html");
    std::fs::write(&path, "<h1>Privacy</h1>").unwrap();
    let mut cfg = test_config(&url);
    cfg.server.privacy_policy_path = Some(path);
    let app = build_app(cfg).await.unwrap();
    let (status, body) = get(&app, "/privacypolicy").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>Privacy</h1>");
}

#[tokio::test]
async fn sqlite_store_keeps_progress_across_restarts() {
    let (url, log) = start_send_api().await;
    let db_path = temp_path("api", "db");
    let mut cfg = test_config(&url);
    cfg.store.kind = "sqlite".to_string();
    cfg.store.sqlite_path = Some(db_path.clone());

    let app = build_app(cfg.clone()).await.unwrap();
    start(&app, &log, "u-sql").await;
    post_webhook(&app, postback("u-sql", "ONBOARD")).await;
    log.wait_for(2).await;
    post_webhook(&app, text("u-sql", "Ava")).await;
    log.wait_for(3).await;
    drop(app);

    let reopened = build_app(cfg).await.unwrap();
    let (status, page) = dev_view(&reopened, "u-sql", "dev-pass").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("<p>ADD_GOAL-CHECK_IN</p>"));
}
