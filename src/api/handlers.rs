//! API Handlers
//!
//! HTTP request handlers for the storage engine and auto-save coordinator
//! endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;

use crate::autosave::{AutoSaveCoordinator, AutoSaveEntry, SourceChange};
use crate::config::Config;
use crate::error::{AutoSaveError, StorageError, StorageResult};
use crate::models::{
    validate_key, BackendQuery, DeleteResponse, EntriesResponse, FlushResponse, HealthResponse,
    ImportResponse, KeysResponse, SaveEntryRequest, SaveEntryResponse, SetPathRequest,
    SetResponse, SetValueRequest, StatsResponse, TerminationResponse, ValueResponse,
};
use crate::storage::{SharedStorage, StorageEngine};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared storage engine
    pub storage: SharedStorage,
    /// Handle to the auto-save coordinator writing through `storage`
    pub autosave: AutoSaveCoordinator,
}

impl AppState {
    pub fn new(storage: SharedStorage, autosave: AutoSaveCoordinator) -> Self {
        Self { storage, autosave }
    }

    /// Builds the storage engine and spawns a coordinator over it.
    ///
    /// The durable backend lives under `config.data_dir`. The coordinator is
    /// not initialized yet.
    pub fn from_config(config: &Config) -> StorageResult<Self> {
        let storage = StorageEngine::open(config.storage_config(), &config.data_dir)?.into_shared();
        let (autosave, _handle) = AutoSaveCoordinator::spawn(
            config.autosave_config(),
            storage.clone(),
            config.current_path.clone(),
        );
        Ok(Self::new(storage, autosave))
    }
}

// == Storage Handlers ==

/// Handler for PUT /storage/:key
pub async fn set_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SetValueRequest>,
) -> StorageResult<Json<SetResponse>> {
    if let Some(error_msg) = validate_key(&key) {
        return Err(StorageError::InvalidRequest(error_msg));
    }

    let mut engine = state.storage.write().await;
    if !engine.set(&key, &req.value, &req.options()) {
        return Err(StorageError::Backend(format!("could not store '{key}'")));
    }

    Ok(Json(SetResponse::new(key)))
}

/// Handler for GET /storage/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BackendQuery>,
) -> StorageResult<Json<ValueResponse>> {
    // Write lock: reads update the cache and may purge expired records
    let mut engine = state.storage.write().await;
    let value = engine
        .get(&key, &query.options())
        .ok_or_else(|| StorageError::NotFound(key.clone()))?;

    Ok(Json(ValueResponse::new(key, value)))
}

/// Handler for DELETE /storage/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BackendQuery>,
) -> StorageResult<Json<DeleteResponse>> {
    let options = query.options();
    let mut engine = state.storage.write().await;

    if !engine.has(&key, &options) {
        return Err(StorageError::NotFound(key));
    }
    if !engine.remove(&key, &options) {
        return Err(StorageError::Backend(format!("could not remove '{key}'")));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /storage
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
) -> Json<KeysResponse> {
    let engine = state.storage.read().await;
    Json(KeysResponse::from(engine.keys(&query.options())))
}

/// Handler for DELETE /storage
pub async fn clear_handler(
    State(state): State<AppState>,
    Query(query): Query<BackendQuery>,
) -> StorageResult<Json<Value>> {
    let mut engine = state.storage.write().await;
    if !engine.clear(&query.options()) {
        return Err(StorageError::Backend("could not clear backend".to_string()));
    }
    Ok(Json(serde_json::json!({ "cleared": true })))
}

/// Handler for GET /storage/export
pub async fn export_handler(State(state): State<AppState>) -> Json<BTreeMap<String, Value>> {
    let engine = state.storage.read().await;
    Json(engine.export_data())
}

/// Handler for POST /storage/import
pub async fn import_handler(
    State(state): State<AppState>,
    Json(data): Json<BTreeMap<String, Value>>,
) -> StorageResult<Json<ImportResponse>> {
    let mut engine = state.storage.write().await;
    let imported = engine.import_data(data)?;
    Ok(Json(ImportResponse { imported }))
}

/// Handler for POST /storage/cache/clear
pub async fn clear_cache_handler(State(state): State<AppState>) -> Json<Value> {
    state.storage.write().await.clear_cache();
    Json(serde_json::json!({ "cleared": true }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let engine = state.storage.read().await;
    Json(StatsResponse::new(&engine.stats(), engine.get_storage_size()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

// == Auto-Save Handlers ==

/// Handler for POST /autosave/changes
///
/// Accepted changes are debounced; the response does not wait for the write.
pub async fn change_handler(
    State(state): State<AppState>,
    Json(change): Json<SourceChange>,
) -> Result<Json<Value>, AutoSaveError> {
    state.autosave.notify_change(change).await?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}

/// Handler for POST /autosave/entries
pub async fn save_entry_handler(
    State(state): State<AppState>,
    Json(req): Json<SaveEntryRequest>,
) -> Result<Json<SaveEntryResponse>, AutoSaveError> {
    if let Some(error_msg) = req.validate() {
        return Err(AutoSaveError::InvalidRequest(error_msg));
    }

    let entry = req.into_entry();
    let id = entry.id.clone();
    let queued = state.autosave.save_entry(entry).await?;
    Ok(Json(SaveEntryResponse { id, queued }))
}

/// Handler for GET /autosave/entries
pub async fn list_entries_handler(
    State(state): State<AppState>,
) -> Result<Json<EntriesResponse>, AutoSaveError> {
    let entries = state.autosave.get_unsaved_entries().await?;
    Ok(Json(EntriesResponse::from(entries)))
}

/// Handler for GET /autosave/entries/:id
pub async fn get_entry_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AutoSaveEntry>, AutoSaveError> {
    state
        .autosave
        .get_entry(id.clone())
        .await?
        .map(Json)
        .ok_or(AutoSaveError::NotFound(id))
}

/// Handler for DELETE /autosave/entries/:id
pub async fn clear_entry_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AutoSaveError> {
    if !state.autosave.clear_entry(id.clone()).await? {
        return Err(AutoSaveError::NotFound(id));
    }
    Ok(Json(DeleteResponse::new(id)))
}

/// Handler for DELETE /autosave/entries
pub async fn clear_entries_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, AutoSaveError> {
    state.autosave.clear_all_entries().await?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}

/// Handler for GET /autosave/recovery
pub async fn recovery_handler(
    State(state): State<AppState>,
) -> Result<Json<EntriesResponse>, AutoSaveError> {
    let entries = state.autosave.attempt_recovery().await?;
    Ok(Json(EntriesResponse::from(entries)))
}

/// Handler for POST /autosave/flush
pub async fn flush_handler(
    State(state): State<AppState>,
) -> Result<Json<FlushResponse>, AutoSaveError> {
    let flushed = state.autosave.force_save().await?;
    Ok(Json(FlushResponse { flushed }))
}

/// Handler for POST /autosave/complete
pub async fn complete_handler(State(state): State<AppState>) -> Result<Json<Value>, AutoSaveError> {
    state.autosave.mark_completed().await?;
    Ok(Json(serde_json::json!({ "completed": true })))
}

/// Handler for PUT /autosave/path
pub async fn set_path_handler(
    State(state): State<AppState>,
    Json(req): Json<SetPathRequest>,
) -> Result<Json<Value>, AutoSaveError> {
    state.autosave.set_current_path(req.path.clone()).await?;
    Ok(Json(serde_json::json!({ "path": req.path })))
}

/// Handler for POST /autosave/terminate
pub async fn terminate_handler(
    State(state): State<AppState>,
) -> Result<Json<TerminationResponse>, AutoSaveError> {
    let outcome = state.autosave.terminate().await?;
    Ok(Json(TerminationResponse::from(outcome)))
}
