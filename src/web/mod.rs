//! Web server module

mod error;
mod middleware;
mod routes;
mod ws;

use anyhow::Result;
use axum::{http::Method, routing::get, Router};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;

use crate::config::ServerConfig;
use crate::db::QueryService;
use crate::hub::Hub;

pub struct AppState {
    pub hub: Hub,
    pub store: Arc<dyn QueryService>,
}

pub fn router(state: Arc<AppState>, static_dir: &str) -> Router {
    // The dashboard is usually served from a different origin during development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        // Live alert stream
        .route("/ws", get(ws::ws_handler))
        // Read API
        .route("/api/alerts/recent", get(routes::api_recent_alerts))
        .route("/api/logs/search", get(routes::api_search_logs))
        .route("/api/stats", get(routes::api_stats))
        .route("/health", get(routes::health))
        // Built dashboard bundle
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
        .layer(middleware::RequestLoggingLayer::new())
        .with_state(state)
}

pub async fn start_server<F>(config: &ServerConfig, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, &config.static_dir);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertRecord, LogEntry, SearchQuery, Severity, Stats};
    use crate::db::StoreError;
    use crate::hub::HubConfig;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use futures::StreamExt;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeStore {
        alerts: Vec<AlertRecord>,
        fail: bool,
        seen_limits: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl QueryService for FakeStore {
        async fn fetch_recent(&self, limit: i64) -> Result<Vec<AlertRecord>, StoreError> {
            self.seen_limits.lock().unwrap().push(limit);
            if self.fail {
                return Err(StoreError::Query(sqlx::Error::PoolClosed));
            }
            Ok(self.alerts.iter().take(limit as usize).cloned().collect())
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<LogEntry>, StoreError> {
            if self.fail {
                return Err(StoreError::Query(sqlx::Error::PoolClosed));
            }
            Ok(Vec::new())
        }

        async fn stats(&self) -> Result<Stats, StoreError> {
            Ok(Stats::default())
        }
    }

    fn app(store: Arc<FakeStore>) -> (Router, Hub) {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let state = Arc::new(AppState {
            hub: hub.clone(),
            store,
        });
        (router(state, "static-missing-for-tests"), hub)
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn alerts(n: usize) -> Vec<AlertRecord> {
        (0..n)
            .map(|i| AlertRecord::new(Severity::High, format!("rule_{i}"), "192.0.2.1".into()))
            .collect()
    }

    #[tokio::test]
    async fn recent_alerts_respects_limit() {
        let store = Arc::new(FakeStore { alerts: alerts(10), ..Default::default() });
        let (app, _hub) = app(store.clone());

        let (status, body) = fetch(app, "/api/alerts/recent?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 5);
        assert_eq!(body[0]["rule_name"], "rule_0");
        assert_eq!(*store.seen_limits.lock().unwrap(), [5]);
    }

    #[tokio::test]
    async fn recent_alerts_limit_is_defaulted_and_capped() {
        let store = Arc::new(FakeStore::default());
        let (app, _hub) = app(store.clone());

        fetch(app.clone(), "/api/alerts/recent").await;
        fetch(app, "/api/alerts/recent?limit=100000").await;
        assert_eq!(*store.seen_limits.lock().unwrap(), [50, 500]);
    }

    #[tokio::test]
    async fn non_positive_limit_is_rejected() {
        let (app, _hub) = app(Arc::new(FakeStore::default()));
        let (status, body) = fetch(app, "/api/alerts/recent?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "limit must be positive");
    }

    #[tokio::test]
    async fn store_failure_is_a_server_error() {
        let store = Arc::new(FakeStore { fail: true, ..Default::default() });
        let (app, _hub) = app(store);

        let (status, body) = fetch(app.clone(), "/api/alerts/recent").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "query failed");

        let (status, _) = fetch(app, "/api/logs/search?service=ssh").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn inverted_search_range_is_rejected() {
        let (app, _hub) = app(Arc::new(FakeStore::default()));
        let (status, _) = fetch(
            app.clone(),
            "/api/logs/search?start_time=2024-05-02T00:00:00Z&end_time=2024-05-01T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = fetch(app, "/api/logs/search?min_score=0.8&limit=10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn health_reports_hub_gauges() {
        let (app, hub) = app(Arc::new(FakeStore::default()));
        let (subscriber, _queue) = hub.subscriber();
        hub.register(subscriber).await;
        hub.sync().await;

        let (status, body) = fetch(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["subscribers"], 1);
        assert_eq!(body["evicted_subscribers"], 0);
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_static_files() {
        let (app, _hub) = app(Arc::new(FakeStore::default()));
        let (status, _) = fetch(app, "/definitely/not/here.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    /// Serve `app` on an ephemeral local port
    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        addr
    }

    /// Sessions register and unregister asynchronously; poll until the hub agrees
    async fn wait_for_members(hub: &Hub, expected: usize) {
        let settled = async {
            while hub.sync().await != Some(expected) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), settled)
            .await
            .unwrap_or_else(|_| panic!("hub never reached {expected} members"));
    }

    #[tokio::test]
    async fn websocket_session_streams_alerts_until_client_leaves() {
        let (app, hub) = app(Arc::new(FakeStore::default()));
        let addr = serve(app).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        wait_for_members(&hub, 1).await;

        hub.broadcast(AlertRecord::new(Severity::Critical, "port_scan".into(), "203.0.113.50".into()))
            .await;
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame delivered")
            .unwrap()
            .unwrap();
        let text = match frame {
            WsMessage::Text(text) => text,
            other => panic!("expected a text frame, got {other:?}"),
        };
        let alert: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(alert["rule_name"], "port_scan");
        assert_eq!(alert["severity"], "critical");

        socket.close(None).await.unwrap();
        wait_for_members(&hub, 0).await;
        assert_eq!(hub.evicted_subscribers(), 0);
    }

    #[tokio::test]
    async fn hub_shutdown_ends_websocket_session() {
        let (app, hub) = app(Arc::new(FakeStore::default()));
        let addr = serve(app).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        wait_for_members(&hub, 1).await;
        hub.shutdown().await;

        let ended = async {
            loop {
                match socket.next().await {
                    Some(Ok(WsMessage::Text(text))) => panic!("unexpected alert {text}"),
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), ended)
            .await
            .expect("session outlived the hub");
    }
}
