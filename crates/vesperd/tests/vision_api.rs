//! Vision service API tests against a scripted mock encoder.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use vesper_common::ServiceError;
use vesperd::backends::VisionEncoder;
use vesperd::config::{ServerConfig, VisionConfig};
use vesperd::services::vision::{router, VisionState};

const DIM: usize = 8;

/// Images embed to the first axis; text containing "cat" lands on the
/// same axis, all other text on an orthogonal one. That makes tag and
/// similarity outcomes exact.
struct ScriptedEncoder {
    image_calls: Arc<AtomicUsize>,
    text_calls: Arc<AtomicUsize>,
}

fn axis(index: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[index] = 1.0;
    v
}

impl VisionEncoder for ScriptedEncoder {
    async fn embed_image(&self, _image: &[u8]) -> Result<Vec<f32>, ServiceError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(axis(0))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("cat") {
            Ok(axis(0))
        } else {
            Ok(axis(1))
        }
    }

    async fn caption(&self, _image: &[u8]) -> Result<String, ServiceError> {
        Ok("a small test image".to_string())
    }

    async fn verify(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

fn test_app() -> (Router, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let image_calls = Arc::new(AtomicUsize::new(0));
    let text_calls = Arc::new(AtomicUsize::new(0));
    let encoder = ScriptedEncoder {
        image_calls: Arc::clone(&image_calls),
        text_calls: Arc::clone(&text_calls),
    };
    let state = VisionState::new(
        encoder,
        VisionConfig::default(),
        &ServerConfig::default(),
        true,
    );
    (router(state), image_calls, text_calls)
}

fn png_base64() -> String {
    let img = image::DynamicImage::new_rgb8(2, 2);
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    STANDARD.encode(&buf)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn missing_image_is_rejected_before_the_encoder() {
    let (app, image_calls, _) = test_app();
    let (status, _) = post_json(&app, "/embed/image", json!({ "image": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(image_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_base64_is_a_client_error() {
    let (app, image_calls, _) = test_app();
    let (status, body) = post_json(&app, "/embed/image", json!({ "image": "@@@@" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(image_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repeated_image_is_served_from_cache() {
    let (app, image_calls, _) = test_app();
    let image = png_base64();

    let (status, first) = post_json(&app, "/embed/image", json!({ "image": image })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cached"], false);
    assert_eq!(image_calls.load(Ordering::SeqCst), 1);

    let (status, second) = post_json(&app, "/embed/image", json!({ "image": image })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["cached"], true);
    assert_eq!(image_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first["embedding"], second["embedding"]);
}

#[tokio::test]
async fn data_url_payloads_are_accepted() {
    let (app, _, _) = test_app();
    let image = format!("data:image/png;base64,{}", png_base64());
    let (status, _) = post_json(&app, "/embed/image", json!({ "image": image })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn analyze_returns_caption_and_matching_tags() {
    let (app, _, _) = test_app();
    let (status, body) = post_json(&app, "/analyze", json!({ "image": png_base64() })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "a small test image");

    // Only the "cat" tag prompt lands on the image axis; every other
    // candidate scores zero and stays under the threshold.
    let tags: Vec<String> = body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    assert_eq!(tags, vec!["cat".to_string()]);
}

#[tokio::test]
async fn similarity_prefers_image_text_when_both_given() {
    let (app, _, _) = test_app();
    let image = png_base64();

    let (status, body) = post_json(
        &app,
        "/similarity",
        json!({ "image1": image, "text": "a cat" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["similarity"].as_f64().unwrap(), 1.0);

    let (status, body) = post_json(
        &app,
        "/similarity",
        json!({ "image1": image, "image2": image }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["similarity"].as_f64().unwrap(), 1.0);

    let (status, body) = post_json(
        &app,
        "/similarity",
        json!({ "image1": image, "image2": image, "text": "dog" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Image-text wins; "dog" text is orthogonal to the image axis.
    assert_eq!(body["similarity"].as_f64().unwrap(), 0.0);
}

#[tokio::test]
async fn similarity_with_no_usable_pair_is_rejected() {
    let (app, image_calls, _) = test_app();
    let (status, _) = post_json(&app, "/similarity", json!({ "text": "alone" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(image_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cache_clear_resets_the_cache() {
    let (app, image_calls, _) = test_app();
    let image = png_base64();
    post_json(&app, "/embed/image", json!({ "image": image })).await;
    post_json(&app, "/cache/clear", json!({})).await;
    let (_, body) = post_json(&app, "/embed/image", json!({ "image": image })).await;
    assert_eq!(body["cached"], false);
    assert_eq!(image_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_reports_cache_and_backend() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["backend"], "scripted");
}
