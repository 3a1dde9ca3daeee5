//! API Routes
//!
//! Configures the Axum router with the storage and auto-save endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    change_handler, clear_cache_handler, clear_entries_handler, clear_entry_handler,
    clear_handler, complete_handler, delete_handler, export_handler, flush_handler,
    get_entry_handler, get_handler, health_handler, import_handler, keys_handler,
    list_entries_handler, recovery_handler, save_entry_handler, set_handler, set_path_handler,
    stats_handler, terminate_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Storage
/// - `GET|DELETE /storage` - List keys / clear a backend
/// - `PUT|GET|DELETE /storage/:key` - Store, read, remove a value
/// - `GET /storage/export`, `POST /storage/import` - Dump and restore
/// - `POST /storage/cache/clear` - Drop the in-memory cache
/// - `GET /stats`, `GET /health`
///
/// # Auto-save
/// - `POST /autosave/changes` - Deliver a change notification
/// - `GET|POST|DELETE /autosave/entries`, `GET|DELETE /autosave/entries/:id`
/// - `GET /autosave/recovery` - Entries recoverable for the current path
/// - `POST /autosave/flush`, `POST /autosave/complete`, `POST /autosave/terminate`
/// - `PUT /autosave/path` - Change the current path
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Static segments are matched before the `:key` capture
        .route("/storage", get(keys_handler).delete(clear_handler))
        .route("/storage/export", get(export_handler))
        .route("/storage/import", post(import_handler))
        .route("/storage/cache/clear", post(clear_cache_handler))
        .route(
            "/storage/:key",
            put(set_handler).get(get_handler).delete(delete_handler),
        )
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/autosave/changes", post(change_handler))
        .route(
            "/autosave/entries",
            get(list_entries_handler)
                .post(save_entry_handler)
                .delete(clear_entries_handler),
        )
        .route(
            "/autosave/entries/:id",
            get(get_entry_handler).delete(clear_entry_handler),
        )
        .route("/autosave/recovery", get(recovery_handler))
        .route("/autosave/flush", post(flush_handler))
        .route("/autosave/complete", post(complete_handler))
        .route("/autosave/terminate", post(terminate_handler))
        .route("/autosave/path", put(set_path_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::AutoSaveCoordinator;
    use crate::config::StorageConfig;
    use crate::storage::StorageEngine;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let storage = StorageEngine::in_memory(StorageConfig::default()).into_shared();
        let (autosave, _handle) =
            AutoSaveCoordinator::spawn(Default::default(), storage.clone(), "/");
        create_router(AppState::new(storage, autosave))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_export_not_captured_as_key() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/storage/export")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_endpoint() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/storage/test")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"value":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let app = create_test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/storage/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
