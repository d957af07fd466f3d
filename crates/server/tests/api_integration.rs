//! Integration tests for the HTTP surface.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use messaging::{FailedMessage, FailedMessageStore, InMemoryFailedMessageStore};
use server::AppState;
use server::config::Config;
use server::pipeline::Pipeline;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Setup {
    pipeline: Pipeline,
    failed: InMemoryFailedMessageStore,
}

async fn setup(start: bool) -> Setup {
    let failed = InMemoryFailedMessageStore::new();
    let pipeline = Pipeline::build(&Config::default(), Arc::new(failed.clone()));
    if start {
        pipeline.start(&CancellationToken::new()).await.unwrap();
    }
    Setup { pipeline, failed }
}

fn app(pipeline: &Pipeline) -> axum::Router {
    server::create_app(Arc::new(AppState::from_pipeline(pipeline, None)))
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_ok_once_started() {
    let s = setup(true).await;

    let (status, json) = get_json(app(&s.pipeline), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["broker_connected"], true);
    s.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_health_degraded_before_start() {
    let s = setup(false).await;

    let (status, json) = get_json(app(&s.pipeline), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["bus_initialized"], false);
}

#[tokio::test]
async fn test_cache_stats_sorted_with_ratio() {
    let s = setup(false).await;
    let cache = &s.pipeline.cache;
    cache.set("product:b", &1u32, None).await.unwrap();
    for _ in 0..3 {
        cache.get::<u32>("product:b").await.unwrap();
    }
    cache.get::<u32>("product:a").await.unwrap();

    let (status, json) = get_json(app(&s.pipeline), "/cache/stats").await;

    assert_eq!(status, StatusCode::OK);
    let stats = json.as_array().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0]["key"], "product:a");
    assert_eq!(stats[0]["hit_ratio"], 0.0);
    assert_eq!(stats[1]["key"], "product:b");
    assert_eq!(stats[1]["hits"], 3);

    let (_, single) = get_json(app(&s.pipeline), "/cache/stats?key=product:b").await;
    assert_eq!(single.as_array().unwrap().len(), 1);
    assert_eq!(single[0]["hit_ratio"], 1.0);
}

#[tokio::test]
async fn test_failed_messages_lists_unprocessed() {
    let s = setup(false).await;
    for id in ["m1", "m2"] {
        s.failed
            .record(FailedMessage::new(
                id,
                "OrderPlacedEvent",
                "order_events",
                "orderplacedevent",
                b"{}",
                "inventory down",
            ))
            .await
            .unwrap();
    }
    s.failed.mark_processed("m1").await.unwrap();

    let (status, json) = get_json(app(&s.pipeline), "/failed-messages").await;

    assert_eq!(status, StatusCode::OK);
    let messages = json.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message_id"], "m2");
    assert_eq!(messages[0]["error"], "inventory down");
}

#[tokio::test]
async fn test_metrics_without_recorder_is_not_found() {
    let s = setup(false).await;

    let response = app(&s.pipeline)
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_placed_order_flows_through_started_pipeline() {
    let s = setup(true).await;

    let order = s
        .pipeline
        .commands
        .place_order(
            common::CustomerId::new(),
            vec![domain::OrderItem::new(
                "p1",
                "Widget",
                1,
                common::Money::from_units(10),
            )],
        )
        .await
        .unwrap();

    assert_eq!(order.status(), domain::OrderStatus::Pending);
    s.pipeline.shutdown().await;
}
