//! Fine Uploader Server
//!
//! Server-side companion for the Fine Uploader browser widget:
//! - Traditional uploads: receives whole files or chunks and reassembles them
//! - Direct-to-S3 uploads: signs policy documents and multipart requests,
//!   deletes objects on request
//!
//! The binary is in main.rs; the router is exposed here for integration tests.

pub mod config;
pub mod error;
pub mod routes;
pub mod signing;
pub mod state;
pub mod storage;
pub mod upload;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_request_bytes = state.config().upload.max_request_bytes;

    Router::new()
        .nest("/health", routes::health::router())
        .nest("/upload", routes::upload::router(max_request_bytes))
        .nest("/s3", routes::s3::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
