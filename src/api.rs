//! API HTTP: subida de PDFs, listado/consulta/borrado de mindmaps y las
//! tres acciones de edición dirigida de nodos.
//!
//! El backend de cada petición se elige con el parámetro de query
//! `?backend=sqlite|mongo`; si falta se usa el backend por defecto de la
//! configuración.

use axum::{
    extract::{Json, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::{
    actions::{self, ActionError},
    app_state::{AppState, BackendPair},
    models::PathSegment,
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct LoginPayload {
    password: String,
}

#[derive(Deserialize)]
pub struct BackendQuery {
    backend: Option<String>,
}

/// Cuerpo común de las acciones de nodo: la ruta que direcciona el nodo y
/// los datos del nodo tal y como los ve el frontend (solo usamos `name`).
#[derive(Deserialize)]
pub struct NodeActionPayload {
    #[serde(rename = "nodePath", default)]
    node_path: Vec<PathSegment>,
    #[serde(rename = "nodeData")]
    node_data: NodeData,
}

#[derive(Deserialize)]
pub struct NodeData {
    #[serde(default)]
    name: String,
}

type ApiError = (StatusCode, axum::Json<serde_json::Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/login", post(login_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/mindmaps", get(list_mindmaps_handler))
        .route(
            "/api/mindmaps/:id",
            get(get_mindmap_handler).delete(delete_mindmap_handler),
        )
        .route(
            "/api/mindmaps/:id/regenerate-tooltip",
            post(regenerate_tooltip_handler),
        )
        .route(
            "/api/mindmaps/:id/regenerate-subtree",
            post(regenerate_subtree_handler),
        )
        .route("/api/mindmaps/:id/expand-node", post(expand_node_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[axum::debug_handler]
async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> impl IntoResponse {
    if payload.password == state.config.admin_password {
        (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "Login correcto" })),
        )
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Contraseña incorrecta" })),
        )
    }
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;

    let mut filename = String::new();
    let mut bytes: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("cuerpo multipart inválido: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("documento.pdf").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("no se pudo leer el fichero subido: {e}")))?;
            bytes = Some(data.to_vec());
        }
    }
    let Some(bytes) = bytes else {
        return Err(bad_request("falta el campo multipart 'file'"));
    };

    info!("Subida recibida: '{}' ({} bytes)", filename, bytes.len());
    let pdf_text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| bad_request(format!("no se pudo extraer texto del PDF: {e}")))?;

    let item = actions::ingest_paper(pair.store.as_ref(), &pair.llm, &filename, pdf_text)
        .await
        .map_err(action_error_response)?;

    Ok(Json(json!({ "success": true, "id": item.id, "mindmap": item })))
}

#[axum::debug_handler]
async fn list_mindmaps_handler(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;
    let items = pair
        .store
        .list_all()
        .await
        .map_err(|e| action_error_response(e.into()))?;
    Ok(Json(json!(items)))
}

#[axum::debug_handler]
async fn get_mindmap_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;
    let item = pair
        .store
        .get_by_id(&id)
        .await
        .map_err(|e| action_error_response(e.into()))?;
    match item {
        Some(item) => Ok(Json(json!(item))),
        None => Err(action_error_response(ActionError::DocumentNotFound(id))),
    }
}

#[axum::debug_handler]
async fn delete_mindmap_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;
    let deleted = pair
        .store
        .delete_by_id(&id)
        .await
        .map_err(|e| action_error_response(e.into()))?;
    // Borrar algo inexistente no es un error: se informa "nada borrado".
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[axum::debug_handler]
async fn regenerate_tooltip_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
    Json(payload): Json<NodeActionPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;
    validate_node_payload(&payload)?;

    let tooltip = actions::regenerate_tooltip(
        pair.store.as_ref(),
        &pair.llm,
        &id,
        &payload.node_path,
        &payload.node_data.name,
    )
    .await
    .map_err(action_error_response)?;

    Ok(Json(json!({ "success": true, "newTooltip": tooltip })))
}

#[axum::debug_handler]
async fn regenerate_subtree_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
    Json(payload): Json<NodeActionPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;
    validate_node_payload(&payload)?;

    let children = actions::regenerate_subtree(
        pair.store.as_ref(),
        &pair.llm,
        &id,
        &payload.node_path,
        &payload.node_data.name,
    )
    .await
    .map_err(action_error_response)?;

    Ok(Json(json!({ "success": true, "newChildren": children })))
}

#[axum::debug_handler]
async fn expand_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BackendQuery>,
    Json(payload): Json<NodeActionPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let pair = resolve_pair(&state, &query)?;
    validate_node_payload(&payload)?;

    let children = actions::expand_node(
        pair.store.as_ref(),
        &pair.llm,
        &id,
        &payload.node_path,
        &payload.node_data.name,
    )
    .await
    .map_err(action_error_response)?;

    Ok(Json(json!({ "success": true, "newChildren": children })))
}

// --- Utilidades ---

fn resolve_pair<'a>(state: &'a AppState, query: &BackendQuery) -> Result<&'a BackendPair, ApiError> {
    state
        .pair(query.backend.as_deref())
        .map_err(action_error_response)
}

/// La validación de campos obligatorios se responde en el acto, sin tocar
/// modelo ni persistencia.
fn validate_node_payload(payload: &NodeActionPayload) -> Result<(), ApiError> {
    if payload.node_data.name.trim().is_empty() {
        return Err(bad_request("nodeData.name es obligatorio"));
    }
    Ok(())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

/// Traduce la taxonomía de errores de las acciones a códigos HTTP: los dos
/// "no encontrado" (documento y ruta de nodo) se distinguen en el cuerpo,
/// el fallo definitivo del modelo es un 502 y el de persistencia un 500.
fn action_error_response(err: ActionError) -> ApiError {
    let status = match &err {
        ActionError::DocumentNotFound(_) | ActionError::NodePathNotFound => StatusCode::NOT_FOUND,
        ActionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ActionError::Model(model_err) => {
            error!("Fallo definitivo del LLM: {model_err}");
            StatusCode::BAD_GATEWAY
        }
        ActionError::Store(store_err) => {
            error!("Fallo de persistencia: {store_err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "success": false, "error": err.to_string() })))
}
