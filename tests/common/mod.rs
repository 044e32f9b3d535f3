#![allow(dead_code)]

use ipfs_gateway::{
    db, handlers::content_handlers::GatewayState, routes, services::storage_service::StorageService,
};
use std::sync::Arc;
use tempfile::TempDir;

/// A store rooted in a fresh temp directory with its own SQLite file.
pub struct TestStore {
    pub dir: TempDir,
    pub storage: StorageService,
}

pub async fn store() -> TestStore {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = dir.path().join("meta").join("ipfs.db");
    let database_url = format!("sqlite://{}", db_path.display());

    let pool = db::connect(&database_url)
        .await
        .expect("failed to open sqlite");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let storage = StorageService::new(Arc::new(pool), dir.path().join("store"))
        .with_public_gateway("https://gateway.test");
    TestStore { dir, storage }
}

pub fn router(storage: StorageService) -> axum::Router {
    let state = GatewayState {
        storage,
        gc_max_age: chrono::Duration::hours(24),
    };
    routes::routes::routes().with_state(state)
}
