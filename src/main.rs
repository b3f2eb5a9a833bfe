mod blob;
mod catalog;
mod config;
mod images;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod reference;
mod supabase;
mod tabular;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use blob::{BlobStore, MemoryBlobStore};
use catalog::{CatalogSeed, CatalogStore, InMemoryCatalog};
use config::{CONFIG, ImageSourceKind, IngestConfig};
use images::{AttachedPartsSource, ImageSource, LocalDiskSource};
use metrics_exporter_prometheus::PrometheusHandle;
use models::{ApiError, BatchReport, BulkUploadQuery, BundleUploadRequest};
use pipeline::{BatchError, Pipeline, PipelineConfig};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use supabase::{SupabaseCatalog, SupabaseClient, SupabaseStorage};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target = "ingest.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    let config: &IngestConfig = &CONFIG;
    let pipeline = build_pipeline(config).await?;
    let state = AppState {
        pipeline,
        config: Arc::new(config.clone()),
        prometheus_handle: metrics::install_recorder(),
    };

    let app = router(state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        target = "ingest.api",
        image_source = ?config.image_source,
        style_codes = ?config.style_codes,
        max_batch_rows = config.max_batch_rows,
        "listening on {addr}"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Supabase backs both stores when configured; otherwise everything lives in
/// process memory, seeded from `CATALOG_SEED_PATH` if set.
async fn build_pipeline(config: &IngestConfig) -> eyre::Result<Pipeline> {
    let (catalog, blobs): (Arc<dyn CatalogStore>, Arc<dyn BlobStore>) = match &config.supabase {
        Some(supabase) => {
            let client = SupabaseClient::new(supabase);
            info!(target = "ingest.api", bucket = %supabase.bucket, "using supabase collaborators");
            (
                Arc::new(SupabaseCatalog::new(client.clone())),
                Arc::new(SupabaseStorage::new(client)),
            )
        }
        None => {
            let seed = match &config.catalog_seed_path {
                Some(path) => CatalogSeed::load(path).await?,
                None => CatalogSeed::default(),
            };
            info!(target = "ingest.api", "using in-memory collaborators");
            (
                Arc::new(InMemoryCatalog::from_seed(seed)),
                Arc::new(MemoryBlobStore::new("product-images")),
            )
        }
    };
    Ok(Pipeline::new(PipelineConfig::from(config), catalog, blobs))
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    config: Arc<IngestConfig>,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.config.request_max_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/products/bulk-upload", post(bulk_upload))
        .route("/products/bulk-upload/bundle", post(bulk_upload_bundle))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-ingest",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.config.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret.as_str() {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Bulk product upload from a raw spreadsheet body.
///
/// - Method: `POST`
/// - Path: `/products/bulk-upload?format=csv|xlsx|xls` (or `?filename=products.xlsx`)
/// - Body: the file bytes
/// - Response: `BatchReport`, even when some rows fail
///
/// Image references are read with the configured `IMAGE_SOURCE`.
async fn bulk_upload(
    State(state): State<AppState>,
    Query(query): Query<BulkUploadQuery>,
    body: Bytes,
) -> Result<Json<BatchReport>, AppError> {
    crate::metrics::inc_requests("/products/bulk-upload");
    let extension = query
        .format
        .clone()
        .or_else(|| {
            query
                .filename
                .as_deref()
                .and_then(tabular::extension_of)
                .map(str::to_string)
        })
        .ok_or_else(|| {
            AppError::BadRequest("pass `format` or a `filename` with an extension".to_string())
        })?;
    let source: Box<dyn ImageSource> = match state.config.image_source {
        ImageSourceKind::Local => Box::new(LocalDiskSource::new(state.config.image_base_dir.clone())),
        ImageSourceKind::Attached => Box::new(AttachedPartsSource::empty()),
    };
    info!(
        target = "ingest.api",
        bytes = body.len(),
        format = %extension,
        source = source.name(),
        "bulk upload received"
    );
    let report = state
        .pipeline
        .ingest(&body, &extension, source.as_ref())
        .await?;
    Ok(Json(report))
}

/// Bulk product upload with the images attached to the request.
///
/// - Method: `POST`
/// - Path: `/products/bulk-upload/bundle`
/// - Body: `BundleUploadRequest` (`file` and every image are base64)
/// - Response: `BatchReport`
///
/// Image references in the sheet are matched to attached images by file name.
async fn bulk_upload_bundle(
    State(state): State<AppState>,
    Json(payload): Json<BundleUploadRequest>,
) -> Result<Json<BatchReport>, AppError> {
    crate::metrics::inc_requests("/products/bulk-upload/bundle");
    let extension = tabular::extension_of(&payload.filename)
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::BadRequest(format!("`{}` has no file extension", payload.filename))
        })?;
    let file = BASE64
        .decode(payload.file.trim())
        .map_err(|err| AppError::BadRequest(format!("file is not valid base64: {err}")))?;
    let mut parts = HashMap::with_capacity(payload.images.len());
    for (name, encoded) in &payload.images {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|err| AppError::BadRequest(format!("image `{name}` is not valid base64: {err}")))?;
        parts.insert(name.clone(), bytes);
    }
    let source = AttachedPartsSource::new(parts);
    info!(
        target = "ingest.api",
        filename = %payload.filename,
        bytes = file.len(),
        images = source.len(),
        "bundle upload received"
    );
    let report = state.pipeline.ingest(&file, &extension, &source).await?;
    Ok(Json(report))
}

#[derive(Debug)]
enum AppError {
    Batch(BatchError),
    BadRequest(String),
}

impl From<BatchError> for AppError {
    fn from(value: BatchError) -> Self {
        Self::Batch(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::Batch(err) => {
                let (status, error) = match &err {
                    BatchError::UnsupportedFormat(_) => {
                        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
                    }
                    BatchError::Malformed(_) => (StatusCode::BAD_REQUEST, "malformed_file"),
                    BatchError::TooManyRows { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "too_many_rows"),
                };
                (status, error, err.to_string())
            }
            AppError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "bad_request", detail),
        };
        let payload = ApiError {
            error: error.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_with(config: IngestConfig) -> Router {
        let catalog = InMemoryCatalog::from_seed(
            CatalogSeed::from_yaml(catalog::tests::SEED).expect("seed"),
        );
        let pipeline = Pipeline::new(
            PipelineConfig::from(&config),
            Arc::new(catalog),
            Arc::new(MemoryBlobStore::new("product-images")),
        );
        router(AppState {
            pipeline,
            config: Arc::new(config),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    fn app() -> Router {
        app_with(IngestConfig::default())
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    const CSV: &str = "name,description,categorySlug,mainImage,sku\n\
Rose Suit,Cotton,suits-set,https://cdn.test/rose.jpg,SKU-1\n\
Ghost,Nothing,nonexistent,https://cdn.test/ghost.jpg,SKU-2\n";

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn raw_upload_returns_partial_report() {
        let response = app()
            .oneshot(
                Request::post("/products/bulk-upload?format=csv")
                    .body(Body::from(CSV))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["success"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["errors"][0]["row"], 2);
        assert_eq!(body["errors"][0]["data"], "Ghost");
        assert_eq!(body["imageUploads"]["total"], 0);
    }

    #[tokio::test]
    async fn format_falls_back_to_filename() {
        let response = app()
            .oneshot(
                Request::post("/products/bulk-upload?filename=catalog.CSV")
                    .body(Body::from(CSV))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unsupported_format_is_415() {
        let response = app()
            .oneshot(
                Request::post("/products/bulk-upload?format=pdf")
                    .body(Body::from("%PDF"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json_body(response).await["error"], "unsupported_format");
    }

    #[tokio::test]
    async fn missing_format_is_400() {
        let response = app()
            .oneshot(
                Request::post("/products/bulk-upload")
                    .body(Body::from(CSV))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_batch_is_413() {
        let config = IngestConfig {
            max_batch_rows: 1,
            ..IngestConfig::default()
        };
        let response = app_with(config)
            .oneshot(
                Request::post("/products/bulk-upload?format=csv")
                    .body(Body::from(CSV))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn bundle_matches_attached_images() {
        let csv = "name,description,categorySlug,mainImage,galleryImages\n\
Rose Suit,Cotton,suits-set,front.jpg,\"images/back.png, missing.gif\"\n";
        let payload = json!({
            "filename": "products.csv",
            "file": BASE64.encode(csv),
            "images": {
                "front.jpg": BASE64.encode(b"\xFF\xD8\xFF"),
                "back.png": BASE64.encode(b"\x89PNG"),
            },
        });
        let response = app()
            .oneshot(
                Request::post("/products/bulk-upload/bundle")
                    .header("Content-Type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], 1);
        assert_eq!(body["imageUploads"]["total"], 2);
        assert_eq!(body["imageUploads"]["success"], 2);
    }

    #[tokio::test]
    async fn bundle_rejects_bad_base64() {
        let payload = json!({ "filename": "products.csv", "file": "***" });
        let response = app()
            .oneshot(
                Request::post("/products/bulk-upload/bundle")
                    .header("Content-Type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn metrics_require_key_when_configured() {
        let config = IngestConfig {
            metrics_key: Some("secret".to_string()),
            ..IngestConfig::default()
        };
        let app = app_with(config);
        let denied = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        let allowed = app
            .oneshot(
                Request::get("/metrics")
                    .header("X-Metrics-Key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }
}
