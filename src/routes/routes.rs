//! Defines routes for the gateway.
//!
//! ## Structure
//! - **Gateway read path**
//!   - `GET  /ipfs/{cid}` — stream content
//!   - `HEAD /ipfs/{cid}` — content headers only
//!
//! - **API** (under `/api/v0`)
//!   - `POST   /add?name=`, `POST /add-json?name=`
//!   - `GET    /ls`, `GET /stat/{cid}`, `GET /url/{cid}`
//!   - `POST   /pin/{cid}`, `DELETE /pin/{cid}`
//!   - `POST   /gc`, `POST /export`

use crate::handlers::{
    content_handlers::{
        GatewayState, add_content, add_json, collect_garbage, export_car, get_content,
        head_content, list_content, pin_content, public_url, stat_content, unpin_content,
    },
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all gateway routes.
///
/// The router carries shared state (`GatewayState`) to all handlers.
pub fn routes() -> Router<GatewayState> {
    let api = Router::new()
        .route("/add", post(add_content))
        .route("/add-json", post(add_json))
        .route("/ls", get(list_content))
        .route("/stat/{cid}", get(stat_content))
        .route("/pin/{cid}", post(pin_content).delete(unpin_content))
        .route("/gc", post(collect_garbage))
        .route("/export", post(export_car))
        .route("/url/{cid}", get(public_url));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/ipfs/{cid}", get(get_content).head(head_content))
        .nest("/api/v0", api)
}
