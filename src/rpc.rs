//! Server side of the `CspService.Send` call.

use crate::api::{SEND_PATH, SendRequest, SendResponse};
use crate::storage;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

pub fn router(pool: SqlitePool) -> Router {
    Router::new()
        .route(SEND_PATH, post(send))
        .layer(TraceLayer::new_for_http())
        .with_state(pool)
}

async fn send(State(pool): State<SqlitePool>, Json(request): Json<SendRequest>) -> Response {
    info!(agent = %request.client.user_agent, "Received data");

    match storage::add_report(&pool, &request).await {
        Ok(id) => {
            debug!(%id, application = %request.param.application, "stored CSP report");
            Json(SendResponse {}).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to store CSP report");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{Client, CspReport, Param, SEND_PATH, SendRequest};
    use crate::rpc::router;
    use crate::storage::{count_reports, memory_pool};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_send_stores_report() {
        let pool = memory_pool().await;
        let request = SendRequest {
            timestamp: Utc::now(),
            param: Param::default(),
            client: Client::default(),
            report: CspReport {
                blocked_uri: "eval".to_string(),
                ..CspReport::default()
            },
        };

        let response = router(pool.clone())
            .oneshot(
                Request::post(SEND_PATH)
                    .header("Content-Type", "application/json")
                    .body(Body::from(serde_json::to_vec(&request).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(StatusCode::OK, response.status());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(b"{}".as_slice(), body.as_ref());
        assert_eq!(1, count_reports(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_rejects_garbage() {
        let pool = memory_pool().await;
        let response = router(pool.clone())
            .oneshot(
                Request::post(SEND_PATH)
                    .header("Content-Type", "application/json")
                    .body(Body::from("{\"report\":1}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_eq!(0, count_reports(&pool).await.unwrap());
    }
}
