use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use log::{error, info};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::allocation_service::AllocationService;
use crate::allocator;
use crate::error::{Error, Result};

/// Compatibility surface: every endpoint is a GET with query parameters and
/// a plain-text body, as the original clients expect.
pub fn create_router(service: Arc<AllocationService>) -> Router {
    Router::new()
        .route("/get-cidr", get(get_cidr))
        .route("/get-next-cidr-no-push", get(get_next_cidr_no_push))
        .route("/get-occupied-list", get(get_occupied_list))
        .route("/delete-cidr-from-list", get(delete_cidr_from_list))
        .route("/add-cidr-manually", get(add_cidr_manually))
        .route("/get-subnets", get(get_subnets))
        .route("/health", get(health))
        .with_state(service)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers(Any),
        )
}

pub async fn start_server(service: Arc<AllocationService>, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("CIDR manager is listening on {}", addr);
    axum::serve(listener, create_router(service)).await
}

fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::InvalidReason(_)
        | Error::InvalidCidr(_)
        | Error::InvalidPrefix(_)
        | Error::UnknownRange(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Overlap(_, _) | Error::PoolExhausted(_) => StatusCode::CONFLICT,
        Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn plain(result: Result<String>) -> Response {
    match result {
        Ok(body) => body.into_response(),
        Err(e) => {
            error!("{}", e);
            (status_of(&e), e.to_string()).into_response()
        }
    }
}

/// The prefix arrives as a query-string value; anything non-numeric is
/// rejected before the store is touched.
fn parse_prefix(s: &str) -> Result<u8> {
    s.trim()
        .parse::<u8>()
        .map_err(|_| Error::InvalidPrefix(format!("'{}' is not a number", s)))
}

#[derive(Debug, Deserialize)]
struct AllocateQuery {
    subnet_size: String,
    requiredrange: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    cidr_deletion: String,
}

#[derive(Debug, Deserialize)]
struct AddQuery {
    cidr: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct SubnetsQuery {
    subnet_size: String,
    cidr: String,
}

async fn get_cidr(
    State(service): State<Arc<AllocationService>>,
    Query(q): Query<AllocateQuery>,
) -> Response {
    info!("Getting unique CIDR for reason: {}", q.reason);
    let result = match parse_prefix(&q.subnet_size) {
        Ok(prefix) => service.allocate_commit(prefix, &q.requiredrange, &q.reason).await,
        Err(e) => Err(e),
    };
    plain(result.map(|cidr| cidr.to_string()))
}

async fn get_next_cidr_no_push(
    State(service): State<Arc<AllocationService>>,
    Query(q): Query<AllocateQuery>,
) -> Response {
    info!("Previewing next CIDR for reason: {}", q.reason);
    let result = match parse_prefix(&q.subnet_size) {
        Ok(prefix) => service.allocate_peek(prefix, &q.requiredrange, &q.reason).await,
        Err(e) => Err(e),
    };
    plain(result.map(|cidr| cidr.to_string()))
}

async fn get_occupied_list(State(service): State<Arc<AllocationService>>) -> Response {
    let occupied = service.list_occupied().await;
    plain(
        serde_json::to_string_pretty(&occupied)
            .map_err(|e| Error::Persistence(e.to_string())),
    )
}

async fn delete_cidr_from_list(
    State(service): State<Arc<AllocationService>>,
    Query(q): Query<DeleteQuery>,
) -> Response {
    info!("Deleting CIDR: {}", q.cidr_deletion);
    plain(
        service
            .delete(&q.cidr_deletion)
            .await
            .map(|cidr| format!("Deleted {} from the occupied list", cidr)),
    )
}

async fn add_cidr_manually(
    State(service): State<Arc<AllocationService>>,
    Query(q): Query<AddQuery>,
) -> Response {
    info!("Manually adding CIDR: {} for reason: {}", q.cidr, q.reason);
    plain(
        service
            .add_manual(&q.cidr, &q.reason)
            .await
            .map(|cidr| format!("Added {} to the occupied list", cidr)),
    )
}

async fn get_subnets(Query(q): Query<SubnetsQuery>) -> Response {
    let result = parse_prefix(&q.subnet_size).and_then(|prefix| {
        let net = q
            .cidr
            .parse::<ipnet::Ipv4Net>()
            .map_err(|_| Error::InvalidCidr(q.cidr.clone()))?;
        allocator::subnets_of(&net, prefix)
    });
    plain(result.map(|subnets| {
        subnets
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cidr-manager",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
