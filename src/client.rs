//! HTTP client for a config node
//!
//! Used by the `tsmeta` CLI. Error replies are decoded back into
//! [`Error::Remote`] carrying the server's status code.

use crate::common::{Error, Result};
use crate::coordinator::author::{AuthorRequest, PermissionInfo};
use crate::coordinator::catalog::{StorageGroupRequest, StorageGroupSchema};
use crate::coordinator::http::ErrorBody;
use crate::coordinator::manager::{CoordinatorStatus, NodeRegistration};
use crate::coordinator::node_registry::{NodeId, NodeInfo, NodeLocation, NodeStatus};
use crate::coordinator::partition::{DataPartition, DataPartitionRequest, SchemaPartition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

pub struct ConfigNodeClient {
    base_url: String,
    http: reqwest::Client,
}

impl ConfigNodeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.get("/admin/status").await
    }

    pub async fn register_node(&self, location: &NodeLocation) -> Result<NodeRegistration> {
        self.post("/v1/nodes", location).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.get("/v1/nodes").await
    }

    pub async fn update_node_status(&self, id: NodeId, status: NodeStatus) -> Result<()> {
        self.send_unit(
            self.http
                .put(self.url(&format!("/v1/nodes/{}/status", id)))
                .json(&json!({ "status": status })),
        )
        .await
    }

    pub async fn remove_node(&self, id: NodeId) -> Result<()> {
        self.send_unit(self.http.delete(self.url(&format!("/v1/nodes/{}", id))))
            .await
    }

    pub async fn set_storage_group(&self, req: &StorageGroupRequest) -> Result<()> {
        self.send_unit(self.http.post(self.url("/v1/storage-groups")).json(req))
            .await
    }

    pub async fn list_storage_groups(&self) -> Result<Vec<StorageGroupSchema>> {
        self.get("/v1/storage-groups").await
    }

    pub async fn delete_storage_group(&self, name: &str) -> Result<()> {
        self.send_unit(
            self.http
                .delete(self.url(&format!("/v1/storage-groups/{}", name))),
        )
        .await
    }

    pub async fn set_ttl(&self, name: &str, ttl_ms: i64) -> Result<()> {
        self.send_unit(
            self.http
                .put(self.url(&format!("/v1/storage-groups/{}/ttl", name)))
                .json(&json!({ "ttl_ms": ttl_ms })),
        )
        .await
    }

    pub async fn set_time_partition_interval(&self, name: &str, interval_ms: i64) -> Result<()> {
        self.send_unit(
            self.http
                .put(self.url(&format!(
                    "/v1/storage-groups/{}/time-partition-interval",
                    name
                )))
                .json(&json!({ "interval_ms": interval_ms })),
        )
        .await
    }

    pub async fn schema_partition(
        &self,
        patterns: &[String],
        create: bool,
    ) -> Result<SchemaPartition> {
        let path = if create {
            "/v1/partitions/schema/get-or-create"
        } else {
            "/v1/partitions/schema"
        };
        self.post(path, &json!({ "patterns": patterns })).await
    }

    pub async fn data_partition(
        &self,
        requests: &[DataPartitionRequest],
        create: bool,
    ) -> Result<DataPartition> {
        let path = if create {
            "/v1/partitions/data/get-or-create"
        } else {
            "/v1/partitions/data"
        };
        self.post(path, &json!({ "requests": requests })).await
    }

    pub async fn operate_permission(&self, req: &AuthorRequest) -> Result<()> {
        self.send_unit(self.http.post(self.url("/v1/permissions/operate")).json(req))
            .await
    }

    pub async fn query_permission(&self, req: &AuthorRequest) -> Result<PermissionInfo> {
        self.post("/v1/permissions/query", req).await
    }

    pub async fn check_user_privileges(
        &self,
        user_name: &str,
        paths: &[String],
        privilege: u32,
    ) -> Result<()> {
        self.send_unit(self.http.post(self.url("/v1/permissions/check")).json(&json!({
            "user_name": user_name,
            "paths": paths,
            "privilege": privilege,
        })))
        .await
    }

    pub async fn login(&self, user_name: &str, password: &str) -> Result<()> {
        self.send_unit(
            self.http
                .post(self.url("/v1/login"))
                .json(&json!({ "user_name": user_name, "password": password })),
        )
        .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }

    async fn send_unit(&self, req: reqwest::RequestBuilder) -> Result<()> {
        let resp = req.send().await?;
        Self::check(resp).await.map(drop)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(body) => Err(Error::Remote {
                code: body.code,
                message: body.message,
            }),
            Err(_) => Err(Error::Remote {
                code: crate::common::error::status::INTERNAL,
                message: format!("HTTP {}", status),
            }),
        }
    }
}
