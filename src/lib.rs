pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export the codec and the request pipeline
pub use codec::{EncoderOptions, JsonDecoder, JsonEncoder, Output};
pub use logic::{
    apply_changes, parse_hints, parse_route, CatchallRequest, CatchallTarget, CatchallTargets,
    CatchallView, ConflictPolicy, DiscriminatorPolicy, Dispatcher, Guard, HintCompiler,
    IdentityMap, ReconcileOptions, Reconciler, RequestMethod, Unrestricted, ViewConfig,
};

pub use error::{LiantError, Result};

// Export all model types
pub use model::*;

// Export store types
pub use store::{EntityStore, MemoryStore, UnitOfWork};

/// Demo catch-all view over an in-memory store, seeded when configured
pub fn build_view(config: &crate::config::AppConfig) -> anyhow::Result<CatchallView> {
    use std::sync::Arc;

    let registry = crate::seed::demo_registry()?;
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new());

    if config.seed.load_seed_data {
        crate::seed::load_seed_data(registry.clone(), store.clone())?;
    }

    Ok(CatchallView::new(registry, store, crate::seed::demo_targets())
        .with_config(config.view_config()))
}

/// Bind the configured address and serve the catch-all router for `view`
pub async fn run_server(view: CatchallView, config: &crate::config::AppConfig) -> anyhow::Result<()> {
    use log::info;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    let app = crate::api::routes::create_router().with_state(Arc::new(view));

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("liant server running on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
