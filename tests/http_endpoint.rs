//! End-to-end tests of `POST /` against the noop renderer

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use html2img::server::{router, AppState};
use html2img::{AllowList, NoopRenderer, RenderOptions, RenderOrchestrator, SessionPool, Validator};
use tower::ServiceExt;

const BODY_LIMIT: usize = 4 * 1024 * 1024;

fn app_with(renderer: &NoopRenderer, validator: Option<Validator>) -> Router {
    let pool = SessionPool::new(renderer.clone());
    let orchestrator = RenderOrchestrator::new(pool, RenderOptions::default());
    router(AppState::new(orchestrator, validator), BODY_LIMIT)
}

fn app(renderer: &NoopRenderer) -> Router {
    let allow_list = AllowList::new(["https://cdn.example.com/trusted/"]).unwrap();
    app_with(renderer, Some(Validator::new(allow_list)))
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "text/html")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn renders_png_by_default() {
    let renderer = NoopRenderer::new();
    let response = app(&renderer).oneshot(post("/", "<div>hi</div>")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let body = body_bytes(response).await;
    assert!(body.starts_with(b"\x89PNG\r\n\x1a\n"));
    assert_eq!(renderer.documents().len(), 1);
    assert!(renderer.documents()[0].contains("<div>hi</div>"));
}

#[tokio::test]
async fn base64_encoding_returns_data_uri() {
    let renderer = NoopRenderer::new();
    let response = app(&renderer)
        .oneshot(post("/?type=png&encoding=base64", "<div>hi</div>"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.starts_with("data:image/png;base64,"), "{}", body);
}

#[tokio::test]
async fn jpeg_and_jpg_are_the_same_format() {
    for query in ["/?type=jpeg", "/?type=jpg"] {
        let renderer = NoopRenderer::new();
        let response = app(&renderer).oneshot(post(query, "<b>x</b>")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(renderer.captures()[0].2.quality, Some(80));
    }
}

#[tokio::test]
async fn base64_jpeg_uses_jpeg_prefix() {
    let renderer = NoopRenderer::new();
    let response = app(&renderer)
        .oneshot(post("/?type=jpg&encoding=base64", "<b>x</b>"))
        .await
        .unwrap();
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.starts_with("data:image/jpeg;base64,"), "{}", body);
}

#[tokio::test]
async fn script_is_rejected_with_reason() {
    let renderer = NoopRenderer::new();
    let response = app(&renderer).oneshot(post("/", "<script>x</script>")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("script"), "{}", body);
    assert!(renderer.documents().is_empty());
    assert_eq!(renderer.sessions_created(), 0);
}

#[tokio::test]
async fn external_style_resource_is_rejected() {
    let renderer = NoopRenderer::new();
    let response = app(&renderer)
        .oneshot(post(
            "/",
            "<style>body{background:url(http://evil.example/x.png)}</style>",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("disallowed external resource"), "{}", body);
    assert!(body.contains("http://evil.example/x.png"), "{}", body);
}

#[tokio::test]
async fn disabled_validation_renders_anything() {
    let renderer = NoopRenderer::new();
    let response = app_with(&renderer, None)
        .oneshot(post("/", "<script>x</script>"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(renderer.documents().len(), 1);
}

#[tokio::test]
async fn render_failure_is_a_server_error_with_diagnostic() {
    let renderer = NoopRenderer::new();
    renderer.set_fail_capture(true);
    let app = app(&renderer);

    let response = app.clone().oneshot(post("/", "<p>x</p>")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.starts_with("Rendering failed: capture failed\n"), "{}", body);
    assert!(body.contains("RenderError"), "{}", body);

    // the session was recycled and serves the next request
    renderer.set_fail_capture(false);
    let response = app.oneshot(post("/", "<p>y</p>")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(renderer.sessions_created(), 1);
}

#[tokio::test]
async fn non_text_content_type_is_refused() {
    let renderer = NoopRenderer::new();
    // curl --data without -H sends the form type
    for content_type in ["application/json", "application/x-www-form-urlencoded"] {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from("<p>x</p>"))
            .unwrap();
        let response = app(&renderer).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE, "{}", content_type);
    }
    assert_eq!(renderer.sessions_created(), 0);
}

#[tokio::test]
async fn missing_content_type_is_accepted() {
    let renderer = NoopRenderer::new();
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .body(Body::from("<p>x</p>"))
        .unwrap();
    let response = app(&renderer).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_query_values_are_bad_requests() {
    let renderer = NoopRenderer::new();
    let app = app(&renderer);
    for query in ["/?type=gif", "/?encoding=hex"] {
        let response = app.clone().oneshot(post(query, "<p>x</p>")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", query);
    }
    assert!(renderer.documents().is_empty());
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let renderer = NoopRenderer::new();
    let pool = SessionPool::new(renderer.clone());
    let app = router(
        AppState::new(RenderOrchestrator::new(pool, RenderOptions::default()), None),
        16,
    );
    let response = app.oneshot(post("/", "<p>far more than sixteen bytes</p>")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn only_post_is_routed() {
    let renderer = NoopRenderer::new();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app(&renderer).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
