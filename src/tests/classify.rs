use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};

use super::{closed_addr, spawn_server, test_config, Hits};
use crate::{
    app::AppError,
    classify::{Backend, Category, Classifier},
    config::Config,
    scrape::HtmlFetcher,
};

const MODEL: &str = "test/resnet";

/// Serves `/look.jpg` and a fake inference endpoint that answers 503
/// for the first `failures` calls.
fn spawn_hf(failures: usize) -> (SocketAddr, Hits) {
    let hits = Hits::default();
    let counter = hits.clone();

    let router = Router::new()
        .route("/look.jpg", get(|| async { vec![0xFFu8, 0xD8, 0xFF, 0xE0] }))
        .route(
            &format!("/models/{MODEL}"),
            post(move |headers: HeaderMap, body: Bytes| {
                let counter = counter.clone();
                async move {
                    let n = counter.hit();
                    let authorized = headers
                        .get("authorization")
                        .is_some_and(|v| v.as_bytes() == b"Bearer hf_test");
                    if !authorized || body.is_empty() {
                        return StatusCode::UNAUTHORIZED.into_response();
                    }
                    if n <= failures {
                        return (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(json!({"error": "Model test/resnet is currently loading"})),
                        )
                            .into_response();
                    }
                    Json(json!([
                        {"label": "suit, suit of clothes", "score": 0.62},
                        {"label": "Windsor tie", "score": 0.21},
                        {"label": "jean, blue jean, denim", "score": 0.05},
                    ]))
                    .into_response()
                }
            }),
        );

    (spawn_server(router), hits)
}

fn classifier(config: Config) -> Classifier {
    let fetcher = Arc::new(HtmlFetcher::new(config.scrape.clone()).unwrap());
    Classifier::new(config.classify, fetcher).unwrap()
}

fn hf_config(addr: SocketAddr) -> Config {
    let mut config = test_config();
    config.classify.backend = Backend::HuggingFace;
    config.classify.hf_base_url = format!("http://{addr}");
    config.classify.hf_model = MODEL.to_string();
    config.classify.hf_token = Some("hf_test".to_string());
    config
}

#[test]
fn test_hf_retries_then_succeeds() {
    let (addr, hits) = spawn_hf(2);
    let classifier = classifier(hf_config(addr));

    let result = classifier
        .classify(&format!("http://{addr}/look.jpg"), None)
        .unwrap();

    assert_eq!(hits.count(), 3);
    assert_eq!(result.mode, Backend::HuggingFace);
    assert_eq!(result.category, Category::Smart);
    assert_eq!(result.model.as_deref(), Some(MODEL));
    assert_eq!(result.labels[0].label, "suit, suit of clothes");
    assert!(result.fallback_reason.is_none());
    assert!((result.scores[&Category::Smart] - 0.83).abs() < 1e-5);
    assert!((result.scores[&Category::Casual] - 0.05).abs() < 1e-5);
}

#[test]
fn test_hf_gives_up_and_falls_back_to_mock() {
    let (addr, hits) = spawn_hf(usize::MAX);
    let classifier = classifier(hf_config(addr));

    let image_url = format!("http://{addr}/look.jpg");
    let result = classifier.classify(&image_url, None).unwrap();

    // first try plus three retries
    assert_eq!(hits.count(), 4);
    assert_eq!(result.mode, Backend::Mock);
    assert_eq!(result.category, crate::classify::mock::classify(&image_url).category);
    assert!(result.fallback_reason.unwrap().starts_with("hf:"));
}

#[test]
fn test_unreachable_backend_falls_back_to_mock() {
    let (addr, _) = spawn_hf(0);
    let mut config = hf_config(addr);
    config.classify.hf_base_url = format!("http://{}", closed_addr());
    let classifier = classifier(config);

    let result = classifier
        .classify(&format!("http://{addr}/look.jpg"), None)
        .unwrap();
    assert_eq!(result.mode, Backend::Mock);
    assert!(result.fallback_reason.is_some());
}

#[test]
fn test_unreachable_image_falls_back_to_mock() {
    let (addr, hits) = spawn_hf(0);
    let classifier = classifier(hf_config(addr));

    let result = classifier
        .classify(&format!("http://{}/look.jpg", closed_addr()), None)
        .unwrap();
    assert_eq!(result.mode, Backend::Mock);
    assert_eq!(hits.count(), 0);
}

#[test]
fn test_openai_without_key_falls_back_to_mock() {
    let classifier = classifier(test_config());
    let result = classifier
        .classify("https://img.example.com/look.jpg", Some(Backend::OpenAi))
        .unwrap();
    assert_eq!(result.mode, Backend::Mock);
    assert!(result.fallback_reason.unwrap().contains("OPENAI_API_KEY"));
}

#[test]
fn test_mock_override_is_deterministic() {
    let classifier = classifier(test_config());
    let a = classifier.classify("ab", Some(Backend::Mock)).unwrap();
    let b = classifier.classify("ab", Some(Backend::Mock)).unwrap();
    assert_eq!(a.category, Category::Mode);
    assert_eq!(a.scores, b.scores);
}

#[test]
fn test_invalid_image_urls() {
    let classifier = classifier(hf_config(closed_addr()));
    assert!(matches!(
        classifier.classify("  ", None),
        Err(AppError::BadRequest(_))
    ));
    assert!(matches!(
        classifier.classify("file:///etc/passwd", None),
        Err(AppError::BadRequest(_))
    ));
}
