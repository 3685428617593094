use axum::{routing::get, Router};

use crate::api::handlers::{self, AppState};

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Route strings for every catch-all target
        .route(
            "/*catchall",
            get(handlers::catchall)
                .post(handlers::catchall)
                .delete(handlers::catchall),
        )
}
