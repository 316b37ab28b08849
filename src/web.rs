use crate::{
    app::{AppContext, AppError},
    classify::{Backend, Classification},
    upload,
};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{fmt::Debug, sync::Arc};
use tokio::signal;
use tower_http::set_header::SetResponseHeaderLayer;

const CORS_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const CORS_MAX_AGE: &str = "86400";

#[derive(Clone)]
struct SharedState {
    ctx: Arc<AppContext>,
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.config().max_body_bytes;
    let shared_state = Arc::new(SharedState { ctx });

    Router::new()
        .route(
            "/api/resolve-product",
            post(resolve_product).options(preflight).fallback(post_only),
        )
        .route(
            "/api/analyze",
            post(analyze).options(preflight).fallback(post_only),
        )
        .route(
            "/api/upload",
            post(upload_image).options(preflight).fallback(post_only),
        )
        .route(
            "/api/posts/:id/select-product",
            post(select_product).options(preflight).fallback(post_only),
        )
        .route(
            "/api/health",
            get(health).options(preflight).fallback(get_only),
        )
        .route(
            "/api/echo",
            get(echo).post(echo).options(preflight).fallback(get_or_post),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(ctx: AppContext) -> anyhow::Result<()> {
    let addr = ctx.config().addr.clone();
    let app = router(Arc::new(ctx));

    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {err}");
            }
        };

        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    log::error!("failed to install signal handler: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        log::warn!("shutting down");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Run the HTTP server until Ctrl+C or SIGTERM.
///
/// `ctx` owns blocking HTTP clients, so build it before calling this.
pub fn start_daemon(ctx: AppContext) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(ctx).await })
}

// Make our own error that wraps `AppError`.
#[derive(Debug)]
pub struct HttpError(AppError);

// Tell axum how to convert `AppError` into a `{ok: false, error}` response.
impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::BadRequest(_) | AppError::Base64(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) | AppError::Reqwest(_) => {
                log::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
        };

        (status, Json(json!({"ok": false, "error": self.0.to_string()}))).into_response()
    }
}

// This enables using `?` on functions that return `Result<_, AppError>` (or anything
// convertible into it) inside handlers.
impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_json(rejection: JsonRejection) -> HttpError {
    HttpError(AppError::BadRequest(rejection.body_text()))
}

fn method_not_allowed(allow: &'static str) -> Response {
    let mut resp = HttpError(AppError::MethodNotAllowed).into_response();
    resp.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    resp
}

async fn post_only() -> Response {
    method_not_allowed("POST, OPTIONS")
}

async fn get_only() -> Response {
    method_not_allowed("GET, OPTIONS")
}

async fn get_or_post() -> Response {
    method_not_allowed("GET, POST, OPTIONS")
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(header::ACCESS_CONTROL_MAX_AGE, CORS_MAX_AGE)],
    )
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "error": "Not Found"})),
    )
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub url: Option<String>,
}

async fn resolve_product(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let Json(payload) = payload.map_err(bad_json)?;
    log::debug!("payload: {payload:?}");

    let url = payload
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AppError::BadRequest("url is required".to_string()))?;

    let ctx = state.ctx.clone();
    let product = tokio::task::block_in_place(move || ctx.resolver().resolve(&url))?;

    Ok(Json(json!({"ok": true, "product": product})))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default, rename = "imageUrl", alias = "image_url")]
    pub image_url: Option<String>,

    /// Backend override: `hf`, `openai` or `mock`.
    #[serde(default)]
    pub mode: Option<String>,
}

fn analyze_response(classification: &Classification) -> Value {
    let top3: Vec<Value> = classification
        .top(3)
        .into_iter()
        .map(|(category, score)| {
            json!({"category": category, "label": category.label(), "score": score})
        })
        .collect();

    let mut ai_labels = json!({
        "mode": classification.mode,
        "scores": classification.scores,
        "labels": classification.labels,
        "top3": top3,
    });
    if let Some(model) = &classification.model {
        ai_labels["model"] = json!(model);
    }
    if let Some(reason) = &classification.fallback_reason {
        ai_labels["fallback_reason"] = json!(reason);
    }

    json!({
        "ok": true,
        "category": classification.category,
        "category_label": classification.category.label(),
        "ai_labels": ai_labels,
    })
}

async fn analyze(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let Json(payload) = payload.map_err(bad_json)?;
    log::debug!("payload: {payload:?}");

    let image_url = payload
        .image_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AppError::BadRequest("imageUrl is required".to_string()))?;

    let backend = match payload.mode.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(mode) => Some(
            Backend::parse(mode)
                .ok_or_else(|| AppError::BadRequest(format!("unknown mode '{mode}'")))?,
        ),
    };

    let ctx = state.ctx.clone();
    let classification =
        tokio::task::block_in_place(move || ctx.classifier().classify(&image_url, backend))?;

    Ok(Json(analyze_response(&classification)))
}

#[derive(Deserialize)]
pub struct UploadRequest {
    #[serde(default = "default_filename")]
    pub filename: String,

    #[serde(default, rename = "contentType", alias = "content_type")]
    pub content_type: Option<String>,

    #[serde(default)]
    pub base64: Option<String>,
}

fn default_filename() -> String {
    upload::DEFAULT_FILENAME.to_string()
}

impl Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "UploadRequest {{ filename: {:?}, content_type: {:?}, base64: [REDACTED] }}",
            self.filename, self.content_type
        )
    }
}

async fn upload_image(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let Json(payload) = payload.map_err(bad_json)?;
    log::debug!("payload: {payload:?}");

    let encoded = payload
        .base64
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("base64 is required".to_string()))?;
    let bytes = upload::decode_payload(&encoded)?;
    let content_type = upload::content_type(payload.content_type.as_deref(), &bytes);

    let ctx = state.ctx.clone();
    tokio::task::block_in_place(move || {
        let supabase = ctx.supabase().ok_or(AppError::NotConfigured("supabase"))?;

        let key = upload::object_key(&payload.filename);
        log::info!("uploading {key} ({content_type}, {} bytes)", bytes.len());
        let bucket = &ctx.config().supabase.uploads_bucket;
        supabase.upload_object(bucket, &key, bytes, &content_type)?;

        Ok(Json(json!({
            "ok": true,
            "key": key,
            "publicUrl": supabase.public_url(bucket, &key),
        })))
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectProductRequest {
    #[serde(default)]
    pub product: Option<Value>,

    #[serde(default)]
    pub source: Option<String>,
}

/// The stored selection: the product as sent, plus `source` and `saved_at`.
fn selected_product(product: Value, source: Option<String>) -> Result<Value, AppError> {
    let mut product = match product {
        Value::Object(map) => map,
        _ => return Err(AppError::BadRequest("product must be an object".to_string())),
    };

    let has_url = product
        .get("url")
        .and_then(Value::as_str)
        .is_some_and(|url| !url.trim().is_empty());
    if !has_url {
        return Err(AppError::BadRequest("product.url is required".to_string()));
    }

    let source = source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "manual".to_string());
    product.insert("source".to_string(), json!(source));
    product.insert("saved_at".to_string(), json!(Utc::now().to_rfc3339()));

    Ok(Value::Object(product))
}

async fn select_product(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
    payload: Result<Json<SelectProductRequest>, JsonRejection>,
) -> Result<Json<Value>, HttpError> {
    let Json(payload) = payload.map_err(bad_json)?;
    log::debug!("post {id}: {payload:?}");

    if id.trim().is_empty() {
        return Err(AppError::BadRequest("post id is required".to_string()).into());
    }

    let product = payload
        .product
        .ok_or_else(|| AppError::BadRequest("product.url is required".to_string()))?;
    let selected = selected_product(product, payload.source)?;

    let ctx = state.ctx.clone();
    tokio::task::block_in_place(move || {
        let supabase = ctx.supabase().ok_or(AppError::NotConfigured("supabase"))?;
        supabase.select_product(&id, &selected)?;
        Ok(Json(json!({"ok": true})))
    })
}

fn env_state(is_set: bool) -> &'static str {
    if is_set {
        "set"
    } else {
        "missing"
    }
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<Value> {
    let config = state.ctx.config();
    let has_hf = config.classify.hf_token.is_some();

    Json(json!({
        "ok": true,
        "region": config.region.as_deref().unwrap_or("unknown"),
        "hasHF": has_hf,
        "backend": config.classify.backend,
        "env": {
            "HF_TOKEN": env_state(has_hf),
            "OPENAI_API_KEY": env_state(config.classify.openai_api_key.is_some()),
            "SUPABASE": env_state(config.supabase.is_configured()),
        },
    }))
}

async fn echo() -> Json<Value> {
    Json(json!({"ok": true, "now": Utc::now().to_rfc3339()}))
}
