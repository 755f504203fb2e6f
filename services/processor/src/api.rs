use crate::config::ApiConfig;
use crate::error::Error;
use crate::events::{self, CreateEventRequest};
use crate::ingest::{UploadAck, UploadBundle, UploadCoordinator, UploadedFile};
use crate::media::{MediaKind, MediaStore};
use crate::metadata_store::SourceRepository;
use crate::models::{EventResponse, Source};
use crate::query::EventFilter;
use anyhow::Context;
use axum::{
    body::Body,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SourceRepository>,
    pub coordinator: Arc<UploadCoordinator>,
    pub media: Arc<MediaStore>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl Error {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::MissingInput(_) => (StatusCode::BAD_REQUEST, "MISSING_INPUT"),
            Error::GroupCountMismatch { .. } => (StatusCode::BAD_REQUEST, "COUNT_MISMATCH"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            Error::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::AccessDenied => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            Error::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            Error::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the logs
        let message = if status.is_server_error() {
            error!(error = %self, code = code, "Request failed");
            match self {
                Error::Persistence(_) => "Failed to access the database".to_string(),
                _ => "Failed to access media storage".to_string(),
            }
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::Validation(rejection.body_text())
    }
}

/// Multipart failures are client errors; a body over the limit keeps its 413
fn multipart_error(status: StatusCode, message: String) -> Error {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(message)
    } else {
        Error::Validation(format!("Multipart error: {}", message))
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, max_upload_bytes: usize) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/sources", get(list_sources))
        .route("/source/:id", get(get_source))
        .route("/video/:id", get(stream_video))
        .route("/image/:id", get(stream_image))
        .route("/events", post(create_event).get(search_events))
        .route("/event/:id", get(get_event))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "event-processor"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept a multipart upload of correlated videos, thumbnails and telemetry
#[instrument(skip(state, multipart))]
async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadAck>, Error> {
    let bundle = read_bundle(multipart).await?;
    let ack = state.coordinator.ingest(bundle).await?;
    Ok(Json(ack))
}

/// Collect the `videos`, `images` and `json` parts of a multipart body in order
async fn read_bundle(mut multipart: Multipart) -> Result<UploadBundle, Error> {
    let mut bundle = UploadBundle::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e.status(), e.body_text()))?
    {
        let field_name = field.name().map(|n| n.to_string());
        let file_name = field.file_name().map(|n| n.to_string()).unwrap_or_default();

        let group = match field_name.as_deref() {
            Some("videos") => &mut bundle.videos,
            Some("images") => &mut bundle.images,
            Some("json") => &mut bundle.json,
            _ => continue,
        };

        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e.status(), e.body_text()))?;

        group.push(UploadedFile { file_name, data });
    }

    Ok(bundle)
}

#[instrument(skip(state))]
async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<Source>>, Error> {
    Ok(Json(state.store.list_sources().await?))
}

#[instrument(skip(state))]
async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Source>, Error> {
    Ok(Json(find_source(&state, &id).await?))
}

#[instrument(skip(state))]
async fn stream_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Error> {
    let source = find_source(&state, &id).await?;
    stream_media(&state, MediaKind::Video, &source.video_key).await
}

#[instrument(skip(state))]
async fn stream_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Error> {
    let source = find_source(&state, &id).await?;
    stream_media(&state, MediaKind::Image, &source.thumbnail_key).await
}

async fn find_source(state: &AppState, id: &str) -> Result<Source, Error> {
    state
        .store
        .find_source(id)
        .await?
        .ok_or_else(|| Error::NotFound("Source".to_string()))
}

async fn stream_media(state: &AppState, kind: MediaKind, key: &str) -> Result<Response, Error> {
    let (file, content_type) = state.media.open(kind, key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

#[instrument(skip(state, payload))]
async fn create_event(
    State(state): State<AppState>,
    payload: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventResponse>), Error> {
    let Json(request) = payload?;
    let event = events::create_event(state.store.as_ref(), &request).await?;
    Ok((StatusCode::CREATED, Json(event.into())))
}

#[instrument(skip(state))]
async fn search_events(
    State(state): State<AppState>,
    filter: Result<Query<EventFilter>, QueryRejection>,
) -> Result<Json<Vec<EventResponse>>, Error> {
    let Query(filter) = filter?;
    let events = state.store.query_events(&filter).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state))]
async fn get_event(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<EventResponse>, Error> {
    let Path(id) = id?;
    let event = events::get_event(state.store.as_ref(), id).await?;
    Ok(Json(event.into()))
}

/// Start the HTTP API server and serve until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    max_upload_bytes: usize,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = create_router(state, config, max_upload_bytes);
    let addr = config.bind_addr();

    info!(address = %addr, "Starting event processor API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{FromRequest, FromRequestParts};
    use axum::http::Request;

    async fn error_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_event_body_missing_field_is_validation_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"source_id":"s","end_time":1,"tag":"safe"}"#))
            .unwrap();

        let rejection = Json::<CreateEventRequest>::from_request(request, &())
            .await
            .unwrap_err();
        let response = Error::from(rejection).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = error_body(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].as_str().unwrap().contains("start_time"));
    }

    #[tokio::test]
    async fn test_event_body_without_json_content_type_is_validation_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .body(Body::from("start_time=1"))
            .unwrap();

        let rejection = Json::<CreateEventRequest>::from_request(request, &())
            .await
            .unwrap_err();
        let response = Error::from(rejection).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(response).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_unmatched_path_param_is_validation_error() {
        let (mut parts, _) = Request::builder()
            .uri("/event/abc")
            .body(())
            .unwrap()
            .into_parts();

        let rejection = Path::<i64>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        let response = Error::from(rejection).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = error_body(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_oversized_multipart_maps_to_413() {
        let err = multipart_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "length limit exceeded".to_string(),
        );
        assert!(matches!(err, Error::PayloadTooLarge(_)));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let err = multipart_error(StatusCode::BAD_REQUEST, "bad boundary".to_string());
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_client_errors_map_to_4xx() {
        let cases = [
            (Error::MissingInput("videos".to_string()), StatusCode::BAD_REQUEST),
            (
                Error::GroupCountMismatch {
                    group: "JSON",
                    expected: 2,
                    actual: 1,
                },
                StatusCode::BAD_REQUEST,
            ),
            (Error::Validation("bad".to_string()), StatusCode::BAD_REQUEST),
            (Error::NotFound("Source".to_string()), StatusCode::NOT_FOUND),
            (Error::AccessDenied, StatusCode::FORBIDDEN),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_server_errors_map_to_500() {
        let io = Error::Storage(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(io.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let db = Error::Persistence(sqlx::Error::PoolTimedOut);
        assert_eq!(db.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::AccessDenied.status_and_code().1, "ACCESS_DENIED");
        assert_eq!(
            Error::InvalidPayload(serde_json::from_str::<u8>("x").unwrap_err())
                .status_and_code(),
            (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD")
        );
    }
}
