//! Web and Code tools against loopback HTTP servers.

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchyard_config::AppConfig;
use switchyard_core::delivery::{Messenger, OutboundPayload};
use switchyard_core::error::DeliveryError;
use switchyard_core::tool::{DeliveryChannel, OutputPolicy, ParamSpec, ToolDescriptor, ToolKind, ToolScope};
use switchyard_tools::{ToolExecutor, load_registry};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn executor(descriptors: Vec<ToolDescriptor>) -> ToolExecutor {
    let registry = load_registry(descriptors, 20).unwrap();
    ToolExecutor::new(Arc::new(registry), &AppConfig::default()).unwrap()
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(String, OutboundPayload)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, target: &str, payload: OutboundPayload) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((target.to_string(), payload));
        Ok(())
    }
}

#[tokio::test]
async fn get_template_substitutes_query_and_secret_header() {
    let seen = Arc::new(Mutex::new(None::<(HashMap<String, String>, String)>));
    let seen_in = seen.clone();
    let base = serve(Router::new().route(
        "/users",
        get(move |Query(q): Query<HashMap<String, String>>, headers: HeaderMap| {
            let seen = seen_in.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                *seen.lock().unwrap() = Some((q, auth));
                Json(json!({"id": 7, "full_name": "Ana Silva", "internal": "x"}))
            }
        }),
    ))
    .await;

    let mut tool = ToolDescriptor::new(
        "get_user",
        ToolKind::Web,
        format!("curl -X GET '{base}/users?id={{id}}&lang={{env.SWITCHYARD_TEST_UNSET}}' -H 'Authorization: Bearer {{var.TOKEN}}'"),
    )
    .with_param("id", ParamSpec::new("integer", "User id", true))
    .with_variable("TOKEN", "s3cr3t", true);
    tool.response_map = [("full_name".to_string(), "name".to_string())].into();

    let outcome = executor(vec![tool]).execute("get_user", json!({"id": 7}), None).await;
    assert!(!outcome.is_error(), "{}", outcome.result);
    assert_eq!(outcome.result, json!({"name": "Ana Silva"}));

    let (query, auth) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(query["id"], "7");
    // Unresolved tokens reach the server untouched
    assert_eq!(query["lang"], "{env.SWITCHYARD_TEST_UNSET}");
    assert_eq!(auth, "Bearer s3cr3t");
}

#[tokio::test]
async fn post_template_sends_json_body() {
    let base = serve(Router::new().route(
        "/orders",
        post(|Json(body): Json<Value>| async move { Json(json!({"received": body})) }),
    ))
    .await;

    let tool = ToolDescriptor::new(
        "create_order",
        ToolKind::Web,
        format!(
            "curl -X POST {base}/orders \\\n  -H 'Content-Type: application/json' \\\n  -d '{{\"item\": \"{{item}}\", \"qty\": {{qty}}}}'"
        ),
    );
    let outcome = executor(vec![tool])
        .execute("create_order", json!({"item": "book", "qty": 2}), None)
        .await;
    assert_eq!(outcome.result, json!({"received": {"item": "book", "qty": 2}}));
}

#[tokio::test]
async fn http_errors_and_plain_text_bodies() {
    let base = serve(
        Router::new()
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such thing") }))
            .route("/plain", get(|| async { "just text" })),
    )
    .await;

    let exec = executor(vec![
        ToolDescriptor::new("missing", ToolKind::Web, format!("curl {base}/missing")),
        ToolDescriptor::new("plain", ToolKind::Web, format!("GET {base}/plain")),
    ]);

    let outcome = exec.execute("missing", json!({}), None).await;
    assert!(outcome.is_error());
    assert_eq!(outcome.result["error"], "HTTP 404: no such thing");

    let outcome = exec.execute("plain", json!({}), None).await;
    assert_eq!(outcome.result, json!({"response": "just text"}));
}

#[tokio::test]
async fn web_result_chains_into_code_formatter() {
    let base = serve(Router::new().route(
        "/weather",
        get(|| async { Json(json!({"temp_c": 21, "city": "Lisbon"})) }),
    ))
    .await;

    let fetch = ToolDescriptor::new("weather", ToolKind::Web, format!("curl {base}/weather?city={{city}}"))
        .with_next_tool("describe_weather");
    let mut describe = ToolDescriptor::new(
        "describe_weather",
        ToolKind::Code,
        "result = { message = arguments.city .. ': ' .. arguments.result.temp_c .. 'C' }",
    );
    describe.scope = ToolScope::Auxiliary;

    let outcome = executor(vec![fetch, describe])
        .execute("weather", json!({"city": "Lisbon"}), None)
        .await;
    assert_eq!(outcome.result, json!({"message": "Lisbon: 21C"}));
}

#[tokio::test]
async fn image_result_is_fetched_and_delivered() {
    let base = serve(Router::new().route("/cat.png", get(|| async { vec![0x89u8, 0x50, 0x4e, 0x47] }))).await;

    let tool = ToolDescriptor::new(
        "cat_picture",
        ToolKind::Code,
        format!("result = {{ url = '{base}/cat.png', caption = 'a cat', mime_type = 'image/png' }}"),
    )
    .with_output(OutputPolicy::Both, DeliveryChannel::Image);

    let messenger = Arc::new(RecordingMessenger::default());
    let exec = executor(vec![tool]).with_messenger(messenger.clone());
    let outcome = exec.execute("cat_picture", json!({}), Some("chat-42")).await;

    assert!(outcome.routing.delivered, "{:?}", outcome.routing);
    assert_eq!(outcome.routing.policy, OutputPolicy::Both);
    let sent = messenger.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "chat-42");
    assert_eq!(
        sent[0].1,
        OutboundPayload::Image {
            data: vec![0x89, 0x50, 0x4e, 0x47],
            mime_type: "image/png".into(),
            caption: Some("a cat".into()),
        }
    );
}

#[tokio::test]
async fn code_tool_calls_http_helper() {
    let base = serve(Router::new().route("/ping", post(|body: String| async move { format!("pong:{body}") }))).await;

    let tool = ToolDescriptor::new(
        "pinger",
        ToolKind::Code,
        format!("local status, body = http.request('POST', '{base}/ping', 'hi')\nresult = {{ status = status, body = body }}"),
    );
    let outcome = executor(vec![tool]).execute("pinger", json!({}), None).await;
    assert_eq!(outcome.result, json!({"status": 200, "body": "pong:hi"}));
}
