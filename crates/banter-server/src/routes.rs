//! Route handlers for the chat API.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use banter_core::{ChatService, CoreError};
use banter_protocol::{JobEvent, JobId, JobPayload, JobStatus, MessageId, Role, StatusSnapshot};
use banter_store::StoreError;
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Build the API router around a chat service.
pub fn router(service: ChatService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat/enqueue", post(enqueue))
        .route("/chat/jobs/{job_id}", get(job_status))
        .route("/chat/jobs/{job_id}/stream", get(job_stream))
        .route("/chat/save", post(save_message))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    conversation_id: String,
    payload: JobPayload,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: JobId,
    status: JobStatus,
}

/// POST /chat/enqueue. Accepts the job and returns before processing.
async fn enqueue(
    State(service): State<ChatService>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let job_id = service
        .enqueue_job(&request.conversation_id, request.payload)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// GET /chat/jobs/{job_id}.
async fn job_status(
    State(service): State<ChatService>,
    Path(job_id): Path<JobId>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    Ok(Json(service.get_status(job_id).await?))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(default)]
    from_index: usize,
}

/// GET /chat/jobs/{job_id}/stream. Server-sent events named after the job
/// event variants; the stream ends after `done` or `error`.
async fn job_stream(
    State(service): State<ChatService>,
    Path(job_id): Path<JobId>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!(
        "client subscribed to job stream (job_id={job_id}, from_index={})",
        params.from_index
    );
    let stream = service
        .stream_status(job_id, params.from_index)
        .map(|event| {
            let name = match &event {
                JobEvent::Chunk { .. } => "chunk",
                JobEvent::Done { .. } => "done",
                JobEvent::Error { .. } => "error",
            };
            Event::default().event(name).json_data(&event)
        });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE)
            .text("keep-alive"),
    )
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    conversation_id: String,
    role: Role,
    content: String,
    #[serde(default)]
    sender_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SaveResponse {
    message_id: MessageId,
}

/// POST /chat/save. Persists a message without enqueueing a job.
async fn save_message(
    State(service): State<ChatService>,
    Json(request): Json<SaveRequest>,
) -> Result<Json<SaveResponse>, ApiError> {
    let message_id = service
        .save_message(
            &request.conversation_id,
            request.role,
            &request.content,
            request.sender_name.as_deref(),
        )
        .await?;
    Ok(Json(SaveResponse { message_id }))
}

/// GET /health.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Translates core failures into HTTP responses.
struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("request failed (status={status}): {}", self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use banter_core::MemoryHistoryStore;
    use banter_protocol::{Chunk, JobMetadata};
    use banter_store::{ConversationLog, JobRelay, MemoryStore};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_router() -> (Router, Arc<MemoryStore>, Arc<MemoryHistoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let history = Arc::new(MemoryHistoryStore::new());
        let service = ChatService::new(store.clone(), store.clone(), history.clone());
        (router(service), store, history)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("parse body")
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request")
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (app, _, _) = test_router();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn enqueue_accepts_and_records_the_job() {
        let (app, store, history) = test_router();
        let request = json_request(
            "POST",
            "/chat/enqueue",
            json!({
                "conversation_id": "u1",
                "payload": { "type": "text", "payload": { "message": "hello" } }
            }),
        );
        let response = app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("queued"));
        assert!(body["job_id"].is_string());

        assert_eq!(store.pending_and_backlog_size("u1").await.expect("size"), 1);
        assert_eq!(history.messages("u1").len(), 1);
    }

    #[tokio::test]
    async fn unknown_jobs_report_queued() {
        let (app, _, _) = test_router();
        let uri = format!("/chat/jobs/{}", Uuid::new_v4());
        let response = app
            .oneshot(Request::get(&uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("queued"));
        assert_eq!(body["chunks"], json!([]));
    }

    #[tokio::test]
    async fn completed_jobs_report_the_full_response() {
        let (app, store, _) = test_router();
        let job_id = Uuid::new_v4();
        for (index, content) in [(0, "Hi"), (1, " there")] {
            let chunk = Chunk {
                index,
                content: content.to_string(),
                timestamp: Utc::now(),
            };
            store.append_chunk(job_id, &chunk).await.expect("chunk");
        }
        store
            .set_metadata(&JobMetadata {
                job_id,
                conversation_id: "u1".to_string(),
                total_chunks: 2,
                message_id: Uuid::new_v4(),
                created_at: Utc::now(),
            })
            .await
            .expect("metadata");

        let uri = format!("/chat/jobs/{job_id}");
        let response = app
            .oneshot(Request::get(&uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");

        let body = body_json(response).await;
        assert_eq!(body["status"], json!("complete"));
        assert_eq!(body["total_chunks"], json!(2));
        assert_eq!(body["full_response"], json!("Hi there"));
    }

    #[tokio::test]
    async fn save_persists_a_message() {
        let (app, _, history) = test_router();
        let request = json_request(
            "POST",
            "/chat/save",
            json!({
                "conversation_id": "u1",
                "role": "assistant",
                "content": "noted"
            }),
        );
        let response = app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["message_id"].is_string());

        let messages = history.messages("u1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "noted");
    }

    #[tokio::test]
    async fn malformed_enqueue_bodies_are_rejected() {
        let (app, _, _) = test_router();
        let request = json_request("POST", "/chat/enqueue", json!({ "conversation_id": "u1" }));
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn stream_replays_a_finished_job_and_ends() {
        let (app, store, _) = test_router();
        let job_id = Uuid::new_v4();
        store
            .append_chunk(
                job_id,
                &Chunk {
                    index: 0,
                    content: "Hi".to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await
            .expect("chunk");
        store
            .set_metadata(&JobMetadata {
                job_id,
                conversation_id: "u1".to_string(),
                total_chunks: 1,
                message_id: Uuid::new_v4(),
                created_at: Utc::now(),
            })
            .await
            .expect("metadata");

        let uri = format!("/chat/jobs/{job_id}/stream");
        let response = app
            .oneshot(Request::get(&uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let text = String::from_utf8(bytes.to_vec()).expect("utf8 body");
        assert!(text.contains("event: chunk"));
        assert!(text.contains("event: done"));
        assert!(text.contains("\"total_chunks\":1"));
    }
}
