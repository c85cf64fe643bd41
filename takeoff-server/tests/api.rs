use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::{json, Value};
use std::io::Cursor;
use takeoff_server::{create_app, AppState};
use tower::ServiceExt;
use vision_takeoff::GeminiConfig;

const AREA_REPLY: &str = "```json\n[\
    {\"item_name\": \"A office\", \"description\": \"yellow\", \"dim1\": 12, \"dim2\": 8.5, \"result\": 102, \"unit\": \"m2\"},\
    {\"item_name\": \"B meeting room\", \"dim1\": \"6\", \"dim2\": \"4\", \"result\": 24, \"unit\": \"m2\"}\
]\n```";

/// Stand-in for the model API that always answers with `reply`
async fn spawn_model_stub(reply: &'static str) -> String {
    let app = Router::new()
        .route(
            "/v1beta/models",
            get(|| async {
                Json(json!({"models": [{"name": "models/gemini-1.5-flash", "supportedGenerationMethods": ["generateContent"]}]}))
            }),
        )
        .route(
            "/v1beta/models/:action",
            post(move || async move {
                Json(json!({"candidates": [{"content": {"parts": [{"text": reply}]}}]}))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Stand-in for the model API that fails every call with `status`
async fn spawn_failing_stub(status: StatusCode, message: &'static str) -> String {
    let error = move || async move {
        (
            status,
            Json(json!({"error": {"code": status.as_u16(), "message": message}})),
        )
    };
    let app = Router::new()
        .route("/v1beta/models", get(error))
        .route("/v1beta/models/:action", post(error));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn app_with(base_url: String, api_key: Option<&str>) -> Router {
    let gemini = GeminiConfig {
        base_url,
        ..GeminiConfig::default()
    };
    create_app(AppState::new(gemini, api_key.map(str::to_string)), &[])
}

fn png_base64() -> String {
    let img = ImageBuffer::from_pixel(24, 24, Rgb([255u8, 255, 0]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    general_purpose::STANDARD.encode(buffer.into_inner())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = app_with("http://127.0.0.1:9".to_string(), None);
    let (status, body) = send_json(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_stateless_recompute() {
    let app = app_with("http://127.0.0.1:9".to_string(), None);
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/recompute",
        Some(json!({
            "mode": {"kind": "wall_area", "height": 3.0},
            "rows": [
                {"label": "A", "dim1": 12, "dim2": 0},
                {"label": "B", "dim1": "abc", "dim2": 2},
                {"label": "C", "dim1": "1,000"}
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results: Vec<f64> = body["table"]["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["result"].as_f64().unwrap())
        .collect();
    assert_eq!(results, vec![36.0, 0.0, 3000.0]);
    assert_eq!(body["table"]["total"], 3036.0);
    assert_eq!(body["table"]["unit"], "m2");
    assert_eq!(body["total_display"], "3,036.00");
}

#[tokio::test]
async fn test_analyze_edit_and_export_flow() {
    let app = app_with(spawn_model_stub(AREA_REPLY).await, None);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({
            "image_base64": png_base64(),
            "rules": "- yellow lines are office A\n- red lines are meeting room B",
            "mode": {"kind": "area"},
            "api_key": "user-key"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["model"], "gemini-1.5-flash");
    assert_eq!(body["table"]["total"], 126.0);
    assert_eq!(body["table"]["rows"][0]["label"], "A office");
    assert_eq!(body["total_display"], "126.00");
    assert!(body.get("message").is_none());
    let id = body["session_id"].as_str().unwrap().to_string();

    // Hand edit: shrink office A, drop room B
    let (status, body) = send_json(
        &app,
        Method::PUT,
        &format!("/sessions/{}/rows", id),
        Some(json!({"rows": [{"label": "A office", "dim1": "10", "dim2": 8}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table"]["total"], 80.0);
    assert_eq!(body["table"]["rows"][0]["description"], "yellow");
    assert_eq!(body["table"]["rows"][0]["reported_result"], 102.0);

    let (status, body) = send_json(
        &app,
        Method::PUT,
        &format!("/sessions/{}/mode", id),
        Some(json!({"mode": {"kind": "perimeter"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table"]["total"], 10.0);
    assert_eq!(body["table"]["unit"], "m");

    let (status, body) = send_json(&app, Method::GET, &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table"]["mode"]["kind"], "perimeter");

    let (status, csv) = send(&app, Method::GET, &format!("/sessions/{}/export/csv", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(csv).unwrap();
    assert!(text.contains("item,formula,subtotal,unit"));
    assert!(text.contains("A office,10.00,10.00,m"));

    let (status, xlsx) = send(&app, Method::GET, &format!("/sessions/{}/export/xlsx", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xlsx.starts_with(b"PK"));

    let (status, body) = send_json(&app, Method::GET, &format!("/sessions/{}/export/pdf", id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UNSUPPORTED_FORMAT");
}

#[tokio::test]
async fn test_analyze_empty_reply_creates_empty_session() {
    let app = app_with(spawn_model_stub("[]").await, Some("server-key"));

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({"image_base64": png_base64(), "rules": "blue = storage"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table"]["rows"].as_array().unwrap().len(), 0);
    assert!(body["message"].as_str().unwrap().contains("no items"));
}

#[tokio::test]
async fn test_analyze_malformed_reply_returns_raw_text() {
    let app = app_with(spawn_model_stub("Sorry, I cannot read this drawing.").await, None);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({"image_base64": png_base64(), "api_key": "k"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MALFORMED_REPLY");
    assert_eq!(body["raw"], "Sorry, I cannot read this drawing.");
}

#[tokio::test]
async fn test_analyze_requires_api_key() {
    let app = app_with("http://127.0.0.1:9".to_string(), None);
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({"image_base64": png_base64(), "api_key": "  "})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "MISSING_API_KEY");
}

#[tokio::test]
async fn test_analyze_rejects_non_image_upload() {
    let app = app_with("http://127.0.0.1:9".to_string(), Some("k"));
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({"image_base64": general_purpose::STANDARD.encode(b"%PDF-1.4")})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_IMAGE");
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = app_with("http://127.0.0.1:9".to_string(), None);
    let uri = "/sessions/00000000-0000-4000-8000-000000000000";
    let (status, body) = send_json(&app, Method::GET, uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "SESSION_NOT_FOUND");
}

async fn analyze_against(base_url: String) -> (StatusCode, Value) {
    let app = app_with(base_url, Some("server-key"));
    send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({"image_base64": png_base64(), "rules": "yellow = office"})),
    )
    .await
}

#[tokio::test]
async fn test_analyze_rejected_key_is_401() {
    let base_url = spawn_failing_stub(
        StatusCode::BAD_REQUEST,
        "API key not valid. Please pass a valid API key.",
    )
    .await;
    let (status, body) = analyze_against(base_url).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_API_KEY");
    assert!(body["message"].as_str().unwrap().contains("API key not valid"));
}

#[tokio::test]
async fn test_analyze_no_usable_model_is_502() {
    let base_url =
        spawn_failing_stub(StatusCode::NOT_FOUND, "model is not found for API version v1beta").await;
    let (status, body) = analyze_against(base_url).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "MODEL_UNAVAILABLE");
    assert!(body["message"].as_str().unwrap().contains("gemini-1.5-pro"));
}

#[tokio::test]
async fn test_analyze_upstream_failure_is_502() {
    let base_url = spawn_failing_stub(StatusCode::INTERNAL_SERVER_ERROR, "Internal error").await;
    let (status, body) = analyze_against(base_url).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "MODEL_ERROR");
}

#[tokio::test]
async fn test_delete_session() {
    let app = app_with(spawn_model_stub(AREA_REPLY).await, Some("server-key"));
    let (status, body) = send_json(
        &app,
        Method::POST,
        "/analyze",
        Some(json!({"image_base64": png_base64()})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let uri = format!("/sessions/{}", body["session_id"].as_str().unwrap());

    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send_json(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "SESSION_NOT_FOUND");

    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
