//! HTTP API for the config node
//!
//! Thin JSON adapter over [`MetadataCoordinator`]. Every operation lives under
//! `/v1`; `/health`, `/admin/status` and `/metrics` are for operators.
//! Errors are returned as `{"code": <status code>, "message": ...}` with the
//! matching HTTP status.

use crate::common::Error;
use crate::coordinator::author::{AuthorRequest, PermissionInfo};
use crate::coordinator::catalog::{StorageGroupRequest, StorageGroupSchema};
use crate::coordinator::manager::{CoordinatorStatus, MetadataCoordinator, NodeRegistration};
use crate::coordinator::node_registry::{NodeId, NodeInfo, NodeLocation, NodeStatus};
use crate::coordinator::partition::{DataPartition, DataPartitionRequest, SchemaPartition};
use crate::coordinator::raft_node::ConsensusGateway;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

type Coord<G> = State<Arc<MetadataCoordinator<G>>>;
type ApiResult<T> = std::result::Result<Json<T>, Error>;

/// Wire shape of an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let leader = match &self {
            Error::NotLeader(hint) => Some(hint.clone()),
            _ => None,
        };
        let body = ErrorBody {
            code: self.status_code(),
            message: self.to_string(),
            leader,
        };
        (self.to_http_status(), Json(body)).into_response()
    }
}

/// Plain success reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub code: u16,
}

fn ok() -> Json<StatusBody> {
    Json(StatusBody {
        code: crate::common::error::status::SUCCESS,
    })
}

#[derive(Debug, Deserialize)]
pub struct NodeStatusBody {
    pub status: NodeStatus,
}

#[derive(Debug, Deserialize)]
pub struct TtlBody {
    pub ttl_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct IntervalBody {
    pub interval_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct PatternsBody {
    pub patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DataPartitionBody {
    pub requests: Vec<DataPartitionRequest>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckPrivilegesBody {
    pub user_name: String,
    pub paths: Vec<String>,
    pub privilege: u32,
}

pub fn create_router<G: ConsensusGateway>(coordinator: Arc<MetadataCoordinator<G>>) -> Router {
    Router::new()
        .route("/health", get(health::<G>))
        .route("/admin/status", get(admin_status::<G>))
        .route("/metrics", get(metrics::<G>))
        // Nodes
        .route("/v1/nodes", post(register_node::<G>).get(list_nodes::<G>))
        .route("/v1/nodes/:id", get(get_node::<G>).delete(remove_node::<G>))
        .route("/v1/nodes/:id/status", put(update_node_status::<G>))
        // Storage groups
        .route(
            "/v1/storage-groups",
            post(set_storage_group::<G>).get(list_storage_groups::<G>),
        )
        .route("/v1/storage-groups/:name", delete(delete_storage_group::<G>))
        .route("/v1/storage-groups/:name/ttl", put(set_ttl::<G>))
        .route(
            "/v1/storage-groups/:name/time-partition-interval",
            put(set_time_partition_interval::<G>),
        )
        // Partitions
        .route("/v1/partitions/schema", post(get_schema_partition::<G>))
        .route(
            "/v1/partitions/schema/get-or-create",
            post(get_or_create_schema_partition::<G>),
        )
        .route("/v1/partitions/data", post(get_data_partition::<G>))
        .route(
            "/v1/partitions/data/get-or-create",
            post(get_or_create_data_partition::<G>),
        )
        // Permissions
        .route("/v1/permissions/operate", post(operate_permission::<G>))
        .route("/v1/permissions/query", post(query_permission::<G>))
        .route("/v1/permissions/check", post(check_user_privileges::<G>))
        .route("/v1/login", post(login::<G>))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(coordinator)
}

async fn health<G: ConsensusGateway>(State(c): Coord<G>) -> impl IntoResponse {
    let is_leader = c.gateway().is_leader();
    Json(json!({
        "status": "healthy",
        "role": if is_leader { "leader" } else { "follower" },
        "is_leader": is_leader,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn admin_status<G: ConsensusGateway>(State(c): Coord<G>) -> Json<CoordinatorStatus> {
    Json(c.status().await)
}

async fn metrics<G: ConsensusGateway>(State(c): Coord<G>) -> impl IntoResponse {
    (StatusCode::OK, c.metrics().to_prometheus())
}

async fn register_node<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(location): Json<NodeLocation>,
) -> ApiResult<NodeRegistration> {
    c.register_node(location).await.map(Json)
}

async fn list_nodes<G: ConsensusGateway>(State(c): Coord<G>) -> ApiResult<Vec<NodeInfo>> {
    c.query_node_info(None).await.map(Json)
}

async fn get_node<G: ConsensusGateway>(
    State(c): Coord<G>,
    Path(id): Path<NodeId>,
) -> ApiResult<NodeInfo> {
    c.query_node_info(Some(id))
        .await?
        .pop()
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("node {}", id)))
}

async fn update_node_status<G: ConsensusGateway>(
    State(c): Coord<G>,
    Path(id): Path<NodeId>,
    Json(body): Json<NodeStatusBody>,
) -> ApiResult<StatusBody> {
    c.update_node_status(id, body.status).await?;
    Ok(ok())
}

async fn remove_node<G: ConsensusGateway>(
    State(c): Coord<G>,
    Path(id): Path<NodeId>,
) -> ApiResult<StatusBody> {
    c.remove_node(id).await?;
    Ok(ok())
}

async fn set_storage_group<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(req): Json<StorageGroupRequest>,
) -> ApiResult<StatusBody> {
    c.set_storage_group(req).await?;
    Ok(ok())
}

async fn list_storage_groups<G: ConsensusGateway>(
    State(c): Coord<G>,
) -> ApiResult<Vec<StorageGroupSchema>> {
    c.get_storage_groups_schema().await.map(Json)
}

async fn delete_storage_group<G: ConsensusGateway>(
    State(c): Coord<G>,
    Path(name): Path<String>,
) -> ApiResult<StatusBody> {
    c.delete_storage_group(&name).await?;
    Ok(ok())
}

async fn set_ttl<G: ConsensusGateway>(
    State(c): Coord<G>,
    Path(name): Path<String>,
    Json(body): Json<TtlBody>,
) -> ApiResult<StatusBody> {
    c.set_ttl(&name, body.ttl_ms).await?;
    Ok(ok())
}

async fn set_time_partition_interval<G: ConsensusGateway>(
    State(c): Coord<G>,
    Path(name): Path<String>,
    Json(body): Json<IntervalBody>,
) -> ApiResult<StatusBody> {
    c.set_time_partition_interval(&name, body.interval_ms).await?;
    Ok(ok())
}

async fn get_schema_partition<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(body): Json<PatternsBody>,
) -> ApiResult<SchemaPartition> {
    c.get_schema_partition(&body.patterns).await.map(Json)
}

async fn get_or_create_schema_partition<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(body): Json<PatternsBody>,
) -> ApiResult<SchemaPartition> {
    c.get_or_create_schema_partition(&body.patterns).await.map(Json)
}

async fn get_data_partition<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(body): Json<DataPartitionBody>,
) -> ApiResult<DataPartition> {
    c.get_data_partition(body.requests).await.map(Json)
}

async fn get_or_create_data_partition<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(body): Json<DataPartitionBody>,
) -> ApiResult<DataPartition> {
    c.get_or_create_data_partition(body.requests).await.map(Json)
}

async fn operate_permission<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(req): Json<AuthorRequest>,
) -> ApiResult<StatusBody> {
    c.operate_permission(req).await?;
    Ok(ok())
}

async fn query_permission<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(req): Json<AuthorRequest>,
) -> ApiResult<PermissionInfo> {
    c.query_permission(req).await.map(Json)
}

async fn check_user_privileges<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(body): Json<CheckPrivilegesBody>,
) -> ApiResult<StatusBody> {
    c.check_user_privileges(&body.user_name, &body.paths, body.privilege)
        .await?;
    Ok(ok())
}

async fn login<G: ConsensusGateway>(
    State(c): Coord<G>,
    Json(body): Json<LoginBody>,
) -> ApiResult<StatusBody> {
    c.login(&body.user_name, &body.password).await?;
    Ok(ok())
}
