//! HTTP surface for the retrieval engine.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /documents?filename=..&modality=..` – Accept a raw document body, start ingesting it
//!   in the background, and return `202 {document_id}` immediately.
//! - `GET /documents/:id/status` – Report one job's readiness plus indexed and skipped fragments.
//! - `GET /status` – Global readiness derived from every known job.
//! - `POST /ask` – Route a question, retrieve fragments, and return an answer with citations.
//! - `GET /assets/:fragment_id` – Serve the PNG behind an `image` citation.
//! - `GET /metrics` – Observe ingestion and query counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Empty questions, empty uploads, and unsupported modalities map to `400`; unknown ids map to
//! `404`. Everything else is absorbed by the pipeline.

use crate::metrics::MetricsSnapshot;
use crate::model::{Answer, DocumentId, FragmentId, ValidationError};
use crate::pipeline::{JobReport, OverallReadiness, PipelineError, QueryRequest, RagApi, Upload};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the HTTP router exposing the ingestion and query surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/documents", post(submit_document::<S>))
        .route("/documents/:id/status", get(document_status::<S>))
        .route("/status", get(overall_status::<S>))
        .route("/ask", post(ask::<S>))
        .route("/assets/:fragment_id", get(get_asset::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Query string for `POST /documents`.
#[derive(Deserialize)]
struct UploadParams {
    /// Original filename; drives modality sniffing and citations.
    #[serde(default)]
    filename: Option<String>,
    /// Explicit modality (`text` | `image` | `pdf`).
    #[serde(default)]
    modality: Option<String>,
}

/// Response body for `POST /documents`.
#[derive(Serialize)]
struct SubmitResponse {
    document_id: DocumentId,
}

/// Accept a document and start ingesting it.
async fn submit_document<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError>
where
    S: RagApi,
{
    let filename = params.filename.unwrap_or_else(|| "upload".to_string());
    let mut upload = Upload::new(body.to_vec(), filename);
    if let Some(modality) = params.modality {
        upload = upload.with_modality(modality);
    }
    let document_id = service.submit(upload).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { document_id })))
}

async fn document_status<S>(
    State(service): State<Arc<S>>,
    Path(document_id): Path<DocumentId>,
) -> Result<Json<JobReport>, AppError>
where
    S: RagApi,
{
    service
        .readiness(document_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("unknown document {document_id}")))
}

async fn overall_status<S>(State(service): State<Arc<S>>) -> Json<OverallReadiness>
where
    S: RagApi,
{
    Json(service.overall_readiness())
}

/// Answer a question from the indexed fragments.
async fn ask<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Answer>, AppError>
where
    S: RagApi,
{
    Ok(Json(service.ask(request).await?))
}

async fn get_asset<S>(
    State(service): State<Arc<S>>,
    Path(fragment_id): Path<FragmentId>,
) -> Result<Response, AppError>
where
    S: RagApi,
{
    match service.asset(fragment_id)? {
        Some(png) => Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response()),
        None => Err(AppError::NotFound(format!("unknown asset {fragment_id}"))),
    }
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "submit_document",
                method: "POST",
                path: "/documents?filename={name}&modality={text|image|pdf}",
                description: "Upload a raw text, image, or PDF body. Ingestion runs in the background; the response returns { \"document_id\": uuid }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "document_status",
                method: "GET",
                path: "/documents/{document_id}/status",
                description: "Report whether a document is ready, how many fragments were indexed, and which were skipped.",
                request_example: None,
            },
            CommandDescriptor {
                name: "status",
                method: "GET",
                path: "/status",
                description: "Global readiness: true once every submitted document has finished ingesting.",
                request_example: None,
            },
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Answer a question from indexed text, OCR text, and images, with citations.",
                request_example: Some(json!({
                    "question": "What was Q3 revenue?",
                    "top_k": 3,
                    "latest_only": false
                })),
            },
            CommandDescriptor {
                name: "asset",
                method: "GET",
                path: "/assets/{fragment_id}",
                description: "Fetch the PNG behind an image citation.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and query counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    BadRequest(ValidationError),
    NotFound(String),
    Internal(PipelineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(error) => (StatusCode::BAD_REQUEST, error.to_string()),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(error) => {
                tracing::error!(error = %error, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(inner: ValidationError) -> Self {
        Self::BadRequest(inner)
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        match inner {
            PipelineError::Validation(error) => Self::BadRequest(error),
            other => Self::Internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::metrics::MetricsSnapshot;
    use crate::model::{
        Answer, AnswerOutcome, DocumentId, DocumentKind, FragmentId, ValidationError,
    };
    use crate::pipeline::{
        JobReport, OverallReadiness, PipelineError, QueryRequest, RagApi, Upload,
    };
    use crate::router::Intent;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn commands_catalog_exposes_ask_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let ask = commands
            .iter()
            .find(|cmd| cmd.name == "ask")
            .expect("ask command present");

        assert_eq!(ask.method, "POST");
        assert_eq!(ask.path, "/ask");
        assert!(ask.request_example.is_some());
        assert!(commands.iter().any(|cmd| cmd.name == "submit_document"));
    }

    #[tokio::test]
    async fn upload_returns_accepted_with_document_id() {
        let service = Arc::new(StubRagService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/documents?filename=notes.txt&modality=text")
                    .body(Body::from("The sky is blue."))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["document_id"], service.document_id.to_string());

        let uploads = service.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].filename, "notes.txt");
        assert_eq!(uploads[0].modality.as_deref(), Some("text"));
        assert_eq!(uploads[0].bytes, b"The sky is blue.");
    }

    #[tokio::test]
    async fn empty_upload_is_a_bad_request() {
        let app = create_router(Arc::new(StubRagService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/documents?filename=empty.txt")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ask_returns_answer_json() {
        let app = create_router(Arc::new(StubRagService::default()));
        let payload = json!({ "question": "What color is the sky?", "top_k": 2 });
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/ask")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["text"], "stub answer to: What color is the sky?");
        assert_eq!(json["intent"], "textual");
    }

    #[tokio::test]
    async fn empty_question_is_a_bad_request() {
        let app = create_router(Arc::new(StubRagService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/ask")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "question": "  " }).to_string()))
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "question must not be empty");
    }

    #[tokio::test]
    async fn unknown_status_and_asset_are_not_found() {
        let service = Arc::new(StubRagService::default());
        for uri in [
            format!("/documents/{}/status", Uuid::new_v4()),
            format!("/assets/{}", Uuid::new_v4()),
        ] {
            let response = create_router(service.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
                .await
                .expect("router response");
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn known_status_and_asset_are_served() {
        let service = Arc::new(StubRagService::default());
        let response = create_router(service.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/documents/{}/status", service.document_id))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ready"], true);
        assert_eq!(json["indexed"], 3);

        let response = create_router(service.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/assets/{}", service.asset_id))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        assert_eq!(&body[..], b"\x89PNG");
    }

    #[tokio::test]
    async fn global_status_and_metrics_are_json() {
        let service = Arc::new(StubRagService::default());
        let response = create_router(service.clone())
            .oneshot(Request::builder().uri("/status").body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        let json = body_json(response).await;
        assert_eq!(json["ready"], true);
        assert_eq!(json["total_jobs"], 1);

        let response = create_router(service)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        let json = body_json(response).await;
        assert_eq!(json["queries_answered"], 4);
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    struct StubRagService {
        document_id: DocumentId,
        asset_id: FragmentId,
        uploads: Mutex<Vec<Upload>>,
    }

    impl Default for StubRagService {
        fn default() -> Self {
            Self {
                document_id: Uuid::new_v4(),
                asset_id: Uuid::new_v4(),
                uploads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RagApi for StubRagService {
        async fn submit(&self, upload: Upload) -> Result<DocumentId, ValidationError> {
            if upload.bytes.is_empty() {
                return Err(ValidationError::EmptyDocument(upload.filename));
            }
            self.uploads.lock().await.push(upload);
            Ok(self.document_id)
        }

        fn readiness(&self, document_id: DocumentId) -> Option<JobReport> {
            (document_id == self.document_id).then(|| JobReport {
                document_id,
                filename: "notes.txt".into(),
                kind: DocumentKind::Text,
                ready: true,
                indexed: 3,
                skipped: Vec::new(),
                submitted_at: "2024-01-01T00:00:00Z".into(),
                completed_at: Some("2024-01-01T00:00:01Z".into()),
            })
        }

        fn overall_readiness(&self) -> OverallReadiness {
            OverallReadiness {
                ready: true,
                total_jobs: 1,
                pending_jobs: 0,
            }
        }

        async fn ask(&self, request: QueryRequest) -> Result<Answer, ValidationError> {
            if request.question.trim().is_empty() {
                return Err(ValidationError::EmptyQuery);
            }
            Ok(Answer {
                text: format!("stub answer to: {}", request.question),
                intent: Intent::Textual,
                citations: Vec::new(),
                outcome: AnswerOutcome::Extractive,
            })
        }

        fn asset(&self, fragment_id: FragmentId) -> Result<Option<Vec<u8>>, PipelineError> {
            Ok((fragment_id == self.asset_id).then(|| b"\x89PNG".to_vec()))
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                queries_answered: 4,
                ..MetricsSnapshot::default()
            }
        }
    }
}
