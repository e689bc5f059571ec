use crate::error::AppError;
use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use vault_core::{
    BulkResult, Entry, ExportOptions, QuerySpec, ScanOptions, ScanReport, SearchResult, TagCount,
    Vault,
};

/// Run an engine call off the async runtime
async fn blocking<T, F>(vault: Arc<Vault>, f: F) -> Result<T, AppError>
where
    F: FnOnce(&Vault) -> vault_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&vault))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::from)
}

// POST /scan
#[derive(Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub auto_tag: Option<bool>,
}

pub async fn scan(
    State(state): State<SharedState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanReport>, AppError> {
    let vault = match req.root.as_deref() {
        Some(root) => state.vault_for(root).await?,
        None => state.require().await?,
    };

    let op = state.begin("scan")?;
    let options = ScanOptions {
        auto_tag: req.auto_tag,
    };
    let report = blocking(vault, move |v| v.scan(&options, op.token())).await?;
    Ok(Json(report))
}

// POST /search
pub async fn search(
    State(state): State<SharedState>,
    Json(spec): Json<QuerySpec>,
) -> Result<Json<SearchResult>, AppError> {
    let vault = state.require().await?;
    let result = blocking(vault, move |v| v.search(&spec)).await?;
    Ok(Json(result))
}

// POST /entries/tags
#[derive(Deserialize)]
pub struct TagRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

pub async fn tag_entries(
    State(state): State<SharedState>,
    Json(req): Json<TagRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let vault = state.require().await?;
    let result = blocking(vault, move |v| v.bulk_tag(&req.ids, &req.add, &req.remove)).await?;
    Ok(Json(result))
}

// POST /entries/delete
#[derive(Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<String>,
}

pub async fn delete_entries(
    State(state): State<SharedState>,
    Json(req): Json<IdsRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let vault = state.require().await?;
    let result = blocking(vault, move |v| v.bulk_delete(&req.ids)).await?;
    Ok(Json(result))
}

// POST /entries/export
#[derive(Deserialize)]
pub struct ExportRequest {
    pub ids: Vec<String>,
    pub destination: String,
    #[serde(default)]
    pub preserve_structure: bool,
}

pub async fn export_entries(
    State(state): State<SharedState>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let vault = state.require().await?;
    let op = state.begin("export")?;
    let options = ExportOptions {
        preserve_structure: req.preserve_structure,
    };
    let result = blocking(vault, move |v| {
        v.bulk_export(&req.ids, &req.destination, &options, op.token())
    })
    .await?;
    Ok(Json(result))
}

// POST /entries/purge
#[derive(Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

pub async fn purge_entries(
    State(state): State<SharedState>,
    Json(req): Json<PurgeRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let vault = state.require().await?;
    let result = blocking(vault, move |v| match req.ids {
        Some(ids) => v.purge_entries(&ids),
        None => v.purge_missing(),
    })
    .await?;
    Ok(Json(result))
}

// GET /entries/{id}
pub async fn get_entry(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Entry>, AppError> {
    let vault = state.require().await?;
    let entry = blocking(vault, move |v| v.get_entry(&id)).await?;
    Ok(Json(entry))
}

// GET /tags
pub async fn list_tags(
    State(state): State<SharedState>,
) -> Result<Json<Vec<TagCount>>, AppError> {
    let vault = state.require().await?;
    let tags = blocking(vault, |v| v.tag_counts()).await?;
    Ok(Json(tags))
}

// POST /tags/rename
#[derive(Deserialize)]
pub struct RenameTagRequest {
    pub from: String,
    pub to: String,
}

pub async fn rename_tag(
    State(state): State<SharedState>,
    Json(req): Json<RenameTagRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let vault = state.require().await?;
    let result = blocking(vault, move |v| v.rename_tag(&req.from, &req.to)).await?;
    Ok(Json(result))
}

// POST /tags/delete
#[derive(Deserialize)]
pub struct DeleteTagRequest {
    pub tag: String,
}

pub async fn delete_tag(
    State(state): State<SharedState>,
    Json(req): Json<DeleteTagRequest>,
) -> Result<Json<BulkResult>, AppError> {
    let vault = state.require().await?;
    let result = blocking(vault, move |v| v.delete_tag(&req.tag)).await?;
    Ok(Json(result))
}

// GET /status
pub async fn status(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let Some(vault) = state.current().await else {
        return Ok(Json(json!({ "vault": null })));
    };
    let status = blocking(vault, |v| v.status()).await?;
    Ok(Json(json!({ "vault": status })))
}

// POST /cancel
pub async fn cancel(State(state): State<SharedState>) -> Json<Value> {
    let cancelled = state.cancel();
    if cancelled {
        tracing::info!("cancel requested");
    }
    Json(json!({ "cancelled": cancelled }))
}
