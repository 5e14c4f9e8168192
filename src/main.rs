//! Form 16 assistant - turns a scanned salary statement into tax figures.

mod advisor;
mod completion;
mod config;
mod error;
mod extractor;
mod fields;
mod merge;
mod ocr;
mod pipeline;
mod preprocess;
mod tax;

use advisor::Advice;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use completion::{CompletionClient, TogetherClient};
use config::Settings;
use error::PipelineError;
use extractor::FieldExtractor;
use fields::{StructuredTaxFields, ValidationIssue};
use ocr::sidecar::OcrSidecar;
use pipeline::{FieldsReport, FullReport, Pipeline};
use std::sync::Arc;
use tax::TaxComputation;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "form16_assistant=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    info!("Loaded settings: {:?}", settings);

    let completion: Arc<dyn CompletionClient> = Arc::new(TogetherClient::new(
        &settings.api_url,
        &settings.api_key,
        settings.completion_timeout,
    )?);
    let recognizer = Arc::new(OcrSidecar::new(&settings.ocr_url, settings.ocr_timeout)?);

    let state = AppState {
        pipeline: Arc::new(Pipeline::new(
            recognizer,
            FieldExtractor::new(
                completion.clone(),
                &settings.extraction_model,
                settings.max_prompt_chars,
            ),
            advisor::AdvisorGenerator::new(completion, &settings.advice_model),
        )),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/defaults", get(defaults))
        .route("/extract", post(extract_fields))
        .route("/compute", post(compute))
        .route("/advice", post(advice))
        .route("/process", post(process))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// A fresh default record, as used before any extraction.
async fn defaults() -> Json<StructuredTaxFields> {
    Json(StructuredTaxFields::default())
}

/// Upload a statement image and recover its fields.
async fn extract_fields(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FieldsReport>, (StatusCode, String)> {
    let data = read_upload(multipart).await?;
    state
        .pipeline
        .analyze_image(&data)
        .await
        .map(Json)
        .map_err(pipeline_error_response)
}

/// Compute liability for a (possibly user-edited) record.
async fn compute(
    State(state): State<AppState>,
    Json(fields): Json<StructuredTaxFields>,
) -> Result<Json<TaxComputation>, (StatusCode, Json<Vec<ValidationIssue>>)> {
    validated(&fields)?;
    Ok(Json(state.pipeline.compute(&fields)))
}

/// Tax-saving suggestions for a record.
async fn advice(
    State(state): State<AppState>,
    Json(fields): Json<StructuredTaxFields>,
) -> Result<Json<Advice>, (StatusCode, Json<Vec<ValidationIssue>>)> {
    validated(&fields)?;
    Ok(Json(state.pipeline.advise(&fields).await))
}

/// Upload a statement image and run the whole pipeline.
async fn process(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FullReport>, (StatusCode, String)> {
    let data = read_upload(multipart).await?;
    state
        .pipeline
        .process(&data)
        .await
        .map(Json)
        .map_err(pipeline_error_response)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Read the `file` field of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, (StatusCode, String)> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("statement").to_string();
            let data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?;
            if data.is_empty() {
                break;
            }
            info!("Received file: {} ({} bytes)", filename, data.len());
            return Ok(data.to_vec());
        }
    }

    Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()))
}

fn validated(fields: &StructuredTaxFields) -> Result<(), (StatusCode, Json<Vec<ValidationIssue>>)> {
    let issues = fields.validate();
    if issues.is_empty() {
        Ok(())
    } else {
        Err((StatusCode::UNPROCESSABLE_ENTITY, Json(issues)))
    }
}

fn pipeline_error_response(err: PipelineError) -> (StatusCode, String) {
    error!("Pipeline aborted: {}", err);
    let status = match err {
        PipelineError::Input(_) => StatusCode::BAD_REQUEST,
        PipelineError::EmptyExtraction => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::ExtractionParse(_) | PipelineError::ExternalService { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}
