use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use parley_bus::{Bus, MemoryBus};
use parley_gateway::build_router;
use parley_modes::{FreeDiscussionMode, ModeRegistry};
use parley_orchestrator::Orchestrator;
use parley_scheduler::{AgentConfig, ParleyConfig, Scheduler};
use parley_session::{PushHub, SessionManager};
use std::io::Write;
use std::sync::Arc;
use tower::util::ServiceExt;

async fn router_fixture() -> (Router, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut agents = Vec::new();
    for (name, pipe) in [("花花", "pipe_huahua"), ("薇薇", "pipe_weiwei")] {
        let prompt_path = tmp.path().join(format!("{}.txt", pipe));
        std::fs::File::create(&prompt_path)
            .unwrap()
            .write_all(format!("你是{}。", name).as_bytes())
            .unwrap();
        agents.push(AgentConfig {
            name: name.to_string(),
            pipe: pipe.to_string(),
            exec_cmd: "true".to_string(),
            system_prompt_path: prompt_path.to_string_lossy().into_owned(),
            avatar: format!("/images/{}.png", pipe),
        });
    }
    let config = ParleyConfig {
        agents,
        redis: Default::default(),
        user: Default::default(),
    };

    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let scheduler = Arc::new(
        Scheduler::new(&config, bus.clone())
            .await
            .unwrap()
            .with_chat_log(tmp.path().join("chat_history.jsonl")),
    );
    let registry = Arc::new(ModeRegistry::new());
    registry
        .register("free_discussion", FreeDiscussionMode::factory())
        .unwrap();
    let orchestrator = Arc::new(Orchestrator::new(registry, "free_discussion"));
    let manager = SessionManager::new(bus, orchestrator, scheduler, PushHub::new(), "");

    (build_router(manager), tmp)
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<&str>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_session_crud() {
    let (router, _tmp) = router_fixture().await;

    let response = request(&router, "GET", "/api/sessions", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, serde_json::json!([]));

    let created = request(&router, "POST", "/api/sessions", None).await;
    assert_eq!(created.status(), StatusCode::OK);
    let session = json_body(created).await;
    let id = session["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("sess_"));
    assert_eq!(session["name"], "新对话");
    assert_eq!(session["messageCount"], 0);

    let fetched = request(&router, "GET", &format!("/api/sessions/{}", id), None).await;
    assert_eq!(fetched.status(), StatusCode::OK);

    let listed = json_body(request(&router, "GET", "/api/sessions", None).await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let deleted = request(&router, "DELETE", &format!("/api/sessions/{}", id), None).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = request(&router, "GET", &format!("/api/sessions/{}", id), None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_message_flow_over_http() {
    let (router, _tmp) = router_fixture().await;
    let session = json_body(request(&router, "POST", "/api/sessions", None).await).await;
    let id = session["id"].as_str().unwrap();

    let sent = request(
        &router,
        "POST",
        &format!("/api/sessions/{}/messages", id),
        Some(r#"{"content":"hi","mentionedCats":["cat_001"]}"#),
    )
    .await;
    assert_eq!(sent.status(), StatusCode::OK);
    let message = json_body(sent).await;
    assert_eq!(message["type"], "user");
    assert_eq!(message["content"], "hi");
    assert_eq!(message["sessionId"], id);

    let messages = json_body(
        request(&router, "GET", &format!("/api/sessions/{}/messages", id), None).await,
    )
    .await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["content"], "花花 已加入对话");

    let history = json_body(
        request(&router, "GET", &format!("/api/sessions/{}/history", id), None).await,
    )
    .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["catName"], "花花");
    assert_eq!(history[0]["response"], "");

    let stats = json_body(
        request(&router, "GET", &format!("/api/sessions/{}/stats", id), None).await,
    )
    .await;
    assert_eq!(stats["totalMessages"], 3);
    assert_eq!(stats["catMessages"], 0);
}

#[tokio::test]
async fn test_bad_bodies_are_400() {
    let (router, _tmp) = router_fixture().await;
    let session = json_body(request(&router, "POST", "/api/sessions", None).await).await;
    let id = session["id"].as_str().unwrap();

    // Schema mismatch: no content field.
    let response = request(
        &router,
        "POST",
        &format!("/api/sessions/{}/messages", id),
        Some("{}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Syntax error.
    let response = request(
        &router,
        "POST",
        &format!("/api/sessions/{}/messages", id),
        Some("{broken"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_message_to_unknown_session_is_404() {
    let (router, _tmp) = router_fixture().await;
    let response = request(
        &router,
        "POST",
        "/api/sessions/sess_missing/messages",
        Some(r#"{"content":"hi"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mode_endpoints() {
    let (router, _tmp) = router_fixture().await;
    let session = json_body(request(&router, "POST", "/api/sessions", None).await).await;
    let id = session["id"].as_str().unwrap();

    let modes = json_body(request(&router, "GET", "/api/modes", None).await).await;
    assert_eq!(modes.as_array().unwrap().len(), 1);
    assert_eq!(modes[0]["name"], "free_discussion");

    let mode = json_body(
        request(&router, "GET", &format!("/api/sessions/{}/mode", id), None).await,
    )
    .await;
    assert_eq!(mode["mode"], "free_discussion");

    let bad = request(
        &router,
        "PUT",
        &format!("/api/sessions/{}/mode", id),
        Some(r#"{"mode":"waterfall"}"#),
    )
    .await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let ok = request(
        &router,
        "PUT",
        &format!("/api/sessions/{}/mode", id),
        Some(r#"{"mode":"free_discussion"}"#),
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);
    assert_eq!(json_body(ok).await["mode"], "free_discussion");
}

#[tokio::test]
async fn test_cat_catalogue_endpoints() {
    let (router, _tmp) = router_fixture().await;

    let cats = json_body(request(&router, "GET", "/api/cats", None).await).await;
    let cats = cats.as_array().unwrap().clone();
    assert_eq!(cats.len(), 2);
    assert_eq!(cats[0]["id"], "cat_001");
    assert_eq!(cats[0]["name"], "花花");
    assert_eq!(cats[0]["color"], "#ff9966");
    assert_eq!(cats[0]["status"], "idle");

    let available = json_body(request(&router, "GET", "/api/cats/available", None).await).await;
    assert_eq!(available.as_array().unwrap().len(), 2);

    let one = request(&router, "GET", "/api/cats/cat_002", None).await;
    assert_eq!(one.status(), StatusCode::OK);
    assert_eq!(json_body(one).await["name"], "薇薇");

    let missing = request(&router, "GET", "/api/cats/cat_404", None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
