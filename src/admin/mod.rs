//! Admin API
//!
//! An HTTP server editing the gateway map and pool map and listing
//! bindings. The admin surface does not take the cluster lock: its writes
//! edit the pools, not the binding set, and may race with allocation by
//! design.
//!
//! # Routes
//!
//! | Path | GET | POST | DELETE/PATCH |
//! |---|---|---|---|
//! | `/api/v1/binding` | list bindings | — | — |
//! | `/api/v1/gateway` | gateway map | upsert `{subnet,gw}` | delete `[{subnet,gw},…]` |
//! | `/api/v1/allocate` | pool map | upsert `{ips,ns}` | delete `[{ips,ns},…]` |
//!
//! PUT is reserved and a no-op; any other method is 405.

pub mod config;
pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::store::AdminStore;

pub use config::{load_conf_dir, load_conf_file, AdminConf};

/// Shared state of the admin handlers
#[derive(Debug)]
pub struct AdminState<S: AdminStore> {
    /// The pool-editor store session
    pub store: Arc<S>,

    /// Whether the binding list bypasses the namespace filter
    pub admin_role: bool,
}

impl<S: AdminStore> Clone for AdminState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            admin_role: self.admin_role,
        }
    }
}

/// Build the admin router
pub fn create_router<S: AdminStore + 'static>(state: AdminState<S>) -> Router {
    Router::new()
        .route("/api/v1/binding", get(handlers::list_bindings::<S>))
        .route(
            "/api/v1/gateway",
            get(handlers::list_gateways::<S>)
                .post(handlers::upsert_gateway::<S>)
                .put(handlers::put_reserved)
                .delete(handlers::delete_gateways::<S>)
                .patch(handlers::delete_gateways::<S>),
        )
        .route(
            "/api/v1/allocate",
            get(handlers::list_pools::<S>)
                .post(handlers::upsert_pool::<S>)
                .put(handlers::put_reserved)
                .delete(handlers::delete_pools::<S>)
                .patch(handlers::delete_pools::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until the task is cancelled
pub async fn serve<S: AdminStore + 'static>(
    state: AdminState<S>,
    listen: &str,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    info!("admin API listening on {listen}");
    let listener = tokio::net::TcpListener::bind(listen).await?;
    axum::serve(listener, app).await
}
