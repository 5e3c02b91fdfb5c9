use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::catalog::{BlockEntry, BlocksCatalog};
use crate::constants;
use crate::engine::WorkflowState;
use crate::error::{CatalogError, EngineError, SettingsError};
use crate::settings::SettingsPatch;

// Shared state for handlers
#[derive(Clone)]
struct WebState {
    app: AppState,
    templates: Arc<AutoReloader>,
}

/// Error body shared by every JSON endpoint: `{"ok": false, "error": "..."}`.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "ok": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Validation(msg) => ApiError::bad_request(msg),
            SettingsError::Persistence(e) => {
                error!(error = %e, "Failed to persist settings");
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Persistence(e) => {
                error!(error = %e, "Failed to persist blocks catalog");
                ApiError::internal(e.to_string())
            }
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

/// `Json` extractor whose rejections use the `ApiError` envelope.
struct ApiJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    T: Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!(error = %rejection, "Rejected request body");
                Err(ApiError {
                    status: rejection.status(),
                    message: rejection.body_text(),
                })
            }
        }
    }
}

#[derive(Serialize)]
struct OkView {
    ok: bool,
}

const OK: OkView = OkView { ok: true };

#[derive(Serialize)]
struct SettingsView {
    api_key_configured: bool,
    api_key_hint: Option<String>,
    technical_checks: String,
    blocks_count: usize,
}

#[derive(Serialize)]
struct BlocksView {
    ok: bool,
    blocks: Vec<BlockEntry>,
}

#[derive(Serialize)]
struct UploadView {
    ok: bool,
    rows: usize,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    user_input: String,
    #[serde(default)]
    state: Option<WorkflowState>,
}

#[derive(Serialize)]
struct ChatView {
    ok: bool,
    assistant_messages: Vec<String>,
    state: WorkflowState,
}

#[derive(Serialize)]
struct ResetView {
    ok: bool,
    state: WorkflowState,
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: String) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<WebState>) -> Result<Html<String>, (StatusCode, Html<String>)> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "Blockplan",
                    template_download => constants::TEMPLATE_DOWNLOAD_NAME,
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn get_settings(State(state): State<WebState>) -> Json<SettingsView> {
    let settings = state.app.settings.load();
    Json(SettingsView {
        api_key_configured: !settings.api_key.trim().is_empty(),
        api_key_hint: settings.api_key_hint(),
        technical_checks: settings.technical_checks,
        blocks_count: state.app.catalog.load().len(),
    })
}

async fn save_settings(
    State(state): State<WebState>,
    ApiJson(patch): ApiJson<SettingsPatch>,
) -> Result<Json<OkView>, ApiError> {
    state.app.settings.save(patch)?;
    info!("Settings updated");
    Ok(Json(OK))
}

async fn clear_settings(State(state): State<WebState>) -> Result<Json<OkView>, ApiError> {
    state.app.settings.clear()?;
    Ok(Json(OK))
}

async fn list_blocks(State(state): State<WebState>) -> Json<BlocksView> {
    Json(BlocksView {
        ok: true,
        blocks: state.app.catalog.load(),
    })
}

async fn upload_blocks(
    State(state): State<WebState>,
    mut multipart: Multipart,
) -> Result<Json<UploadView>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?;
        let entries = state.app.catalog.save_csv(&bytes).map_err(|e| {
            warn!(error = %e, "Rejected blocks upload");
            ApiError::from(e)
        })?;
        return Ok(Json(UploadView {
            ok: true,
            rows: entries.len(),
        }));
    }
    Err(ApiError::bad_request("No file uploaded"))
}

async fn download_template() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", constants::TEMPLATE_DOWNLOAD_NAME),
            ),
        ],
        BlocksCatalog::template(),
    )
}

async fn chat(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<Json<ChatView>, ApiError> {
    let workflow = request.state.unwrap_or_default();
    match state.app.engine.handle_turn(&request.user_input, &workflow).await {
        Ok(reply) => Ok(Json(ChatView {
            ok: true,
            assistant_messages: reply.assistant_messages,
            state: reply.state,
        })),
        Err(e) => {
            let status = match &e {
                EngineError::EmptyInput | EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
                EngineError::Generation(_) => StatusCode::BAD_GATEWAY,
                EngineError::Prompt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status != StatusCode::BAD_REQUEST {
                error!(error = %e, "Chat turn failed");
            }
            Err(ApiError {
                status,
                message: e.user_message(),
            })
        }
    }
}

async fn reset_chat(State(state): State<WebState>) -> Json<ResetView> {
    Json(ResetView {
        ok: true,
        state: state.app.engine.reset(),
    })
}

/// Build the application router. Template and static directories are
/// resolved relative to the working directory.
pub fn create_router(app: AppState, templates_dir: &str, static_dir: &str) -> Router {
    let state = WebState {
        app,
        templates: Arc::new(create_minijinja_env(templates_dir.to_string())),
    };

    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(
        |_req: Request| async {
            Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        },
    ));

    Router::new()
        .route("/", get(index_handler))
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/settings/clear", post(clear_settings))
        .route("/api/blocks", get(list_blocks))
        .route("/api/blocks/upload", post(upload_blocks))
        .route("/api/blocks/template", get(download_template))
        .route("/api/chat", post(chat))
        .route("/api/chat/reset", post(reset_chat))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(addr: SocketAddr, app: AppState) -> Result<()> {
    let router = create_router(app, &constants::TEMPLATES_DIR, &constants::STATIC_DIR);

    info!("Web server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, router.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
