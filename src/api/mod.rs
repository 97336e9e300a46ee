//! HTTP surface: the signing endpoint plus the cert/validity/health
//! collaborator endpoints the teacher's router style groups alongside it.

mod errors;
pub mod handlers;

pub use errors::ApiError;

use crate::metrics::http_metrics_middleware;
use axum::routing::get;
use axum::{middleware, Router};
use handlers::AppState;
use std::sync::Arc;

/// Assemble the full router: the signing endpoint in both its query/POST
/// and path-parameter shapes (`spec.md` §4.2), the cert/validity
/// collaborator endpoints, and the health/metrics operational endpoints
/// added in `SPEC_FULL.md` §2/§6.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/priv/doc",
            get(handlers::doc_query_handler).post(handlers::doc_query_handler),
        )
        .route("/priv/doc/*sign_url", get(handlers::doc_path_handler))
        .route("/amppkg/cert/:cert_sha256", get(handlers::cert_handler))
        .route("/amppkg/validity", get(handlers::validity_handler))
        .route("/healthz", get(handlers::health_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http_metrics_middleware,
        ))
        .with_state(state)
}
