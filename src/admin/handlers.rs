//! Admin API handlers
//!
//! Each endpoint dispatches on method: GET lists, POST upserts one entry,
//! DELETE removes a batch. PATCH is wired as a DELETE alias for clients
//! that cannot put bodies on DELETE; PUT is accepted and does nothing.
//! Bodies are parsed by hand so malformed JSON is a deterministic 400
//! (the Go implementation answered 405 on the gateway endpoint and 505 on
//! the allocate endpoint here; both were bugs).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};

use crate::store::{AdminStore, AllocateMap, GatewayMap};

use super::AdminState;

/// Namespace the binding list is scoped to for non-admin callers
pub(super) const BINDING_NAMESPACE: &str = "default";

fn store_failure(err: &crate::error::StoreError) -> Response {
    warn!("admin store operation failed: {err}");
    (StatusCode::INTERNAL_SERVER_ERROR, "store operation failed").into_response()
}

fn invalid_body() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid parameter.").into_response()
}

/// `GET /api/v1/binding` — list bindings
///
/// Scoped to the `default` namespace unless the server runs with the
/// admin role, which sees every namespace.
pub async fn list_bindings<S: AdminStore>(State(state): State<AdminState<S>>) -> Response {
    match state
        .store
        .bindings(BINDING_NAMESPACE, state.admin_role)
        .await
    {
        Ok(bindings) => Json(bindings).into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/gateway` — list the gateway map
pub async fn list_gateways<S: AdminStore>(State(state): State<AdminState<S>>) -> Response {
    match state.store.all_gateway_map().await {
        Ok(gms) => Json(gms).into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `POST /api/v1/gateway` — upsert one `{subnet, gw}` entry
pub async fn upsert_gateway<S: AdminStore>(
    State(state): State<AdminState<S>>,
    body: String,
) -> Response {
    let Ok(gm) = serde_json::from_str::<GatewayMap>(&body) else {
        return invalid_body();
    };
    info!("gateway upsert {}: {}", gm.subnet, gm.gateway);
    match state.store.insert_gateway_map(gm).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `DELETE`/`PATCH /api/v1/gateway` — delete `[{subnet, gw}, …]`
pub async fn delete_gateways<S: AdminStore>(
    State(state): State<AdminState<S>>,
    body: String,
) -> Response {
    let Ok(gms) = serde_json::from_str::<Vec<GatewayMap>>(&body) else {
        return invalid_body();
    };
    for gm in &gms {
        info!("gateway delete {}: {}", gm.subnet, gm.gateway);
    }
    match state.store.delete_gateway_map(gms).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `GET /api/v1/allocate` — list the pool map
pub async fn list_pools<S: AdminStore>(State(state): State<AdminState<S>>) -> Response {
    match state.store.all_allocate_map().await {
        Ok(ams) => Json(ams).into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `POST /api/v1/allocate` — upsert one `{ips, ns}` entry
pub async fn upsert_pool<S: AdminStore>(
    State(state): State<AdminState<S>>,
    body: String,
) -> Response {
    let Ok(am) = serde_json::from_str::<AllocateMap>(&body) else {
        return invalid_body();
    };
    info!("pool upsert {}: {}", am.namespace, am.allocate);
    match state.store.insert_allocate_map(am).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `DELETE`/`PATCH /api/v1/allocate` — delete `[{ips, ns}, …]`
pub async fn delete_pools<S: AdminStore>(
    State(state): State<AdminState<S>>,
    body: String,
) -> Response {
    let Ok(ams) = serde_json::from_str::<Vec<AllocateMap>>(&body) else {
        return invalid_body();
    };
    for am in &ams {
        info!("pool delete {}: {}", am.namespace, am.allocate);
    }
    match state.store.delete_allocate_map(ams).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => store_failure(&e),
    }
}

/// `PUT` on the gateway and allocate endpoints — reserved, currently a no-op
pub async fn put_reserved() -> StatusCode {
    StatusCode::OK
}
