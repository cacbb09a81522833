//! Kubernetes Adapters
//!
//! Ports backed by the API server. Pools, devices and claims live in the
//! operator's namespace; nodes are cluster scoped.

use crate::crd::{selector_string, BlockDevice, BlockDeviceClaim, StoragePool, TOPOLOGY_LABEL};
use crate::domain::ports::{DeviceClaimer, NodeResolver, PoolStore};
use crate::error::{Error, NodeResolutionFailure, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::core::ErrorResponse;
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Ports over a live cluster
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pools(&self) -> Api<StoragePool> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn devices(&self) -> Api<BlockDevice> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn claims(&self) -> Api<BlockDeviceClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: c, .. }) if *c == code)
}

fn not_found(kind: &str, name: &str, err: kube::Error) -> Error {
    if is_status(&err, 404) {
        Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    } else {
        Error::Kube(err)
    }
}

#[async_trait]
impl NodeResolver for KubeCluster {
    async fn resolve_node(&self, selector: &BTreeMap<String, String>) -> Result<String> {
        let rendered = selector_string(selector);
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default().labels(&rendered)).await?;

        let names: Vec<String> = list
            .items
            .into_iter()
            .filter_map(|n| n.metadata.name)
            .collect();

        match names.len() {
            1 => Ok(names.into_iter().next().unwrap_or_default()),
            0 => Err(Error::NodeResolution {
                selector: rendered,
                failure: NodeResolutionFailure::NoMatch,
            }),
            n => Err(Error::NodeResolution {
                selector: rendered,
                failure: NodeResolutionFailure::Ambiguous(n),
            }),
        }
    }
}

#[async_trait]
impl PoolStore for KubeCluster {
    async fn list_pools(&self, topology: &str) -> Result<Vec<StoragePool>> {
        let selector = format!("{}={}", TOPOLOGY_LABEL, topology);
        let list = self
            .pools()
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(list.items)
    }

    async fn update_pool(&self, pool: &StoragePool) -> Result<StoragePool> {
        // replace carries the resourceVersion read at list time
        self.pools()
            .replace(pool.name(), &PostParams::default(), pool)
            .await
            .map_err(|e| Error::Persist {
                pool: pool.name().to_string(),
                conflict: is_status(&e, 409),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl DeviceClaimer for KubeCluster {
    async fn get_device(&self, name: &str) -> Result<BlockDevice> {
        self.devices()
            .get(name)
            .await
            .map_err(|e| not_found("BlockDevice", name, e))
    }

    async fn claim_device(&self, device: &BlockDevice, owner: &str) -> Result<()> {
        let claim = BlockDeviceClaim::for_device(device.name(), owner);
        let name = BlockDeviceClaim::name_for(device.name());

        match self.claims().create(&PostParams::default(), &claim).await {
            Ok(_) => {
                debug!(device = %device.name(), owner, "Created block device claim");
                Ok(())
            }
            Err(kube::Error::Api(ErrorResponse { ref reason, .. })) if reason == "AlreadyExists" => {
                let existing = self
                    .claims()
                    .get(&name)
                    .await
                    .map_err(|e| not_found("BlockDeviceClaim", &name, e))?;
                if existing.owner() == owner {
                    Ok(())
                } else {
                    Err(Error::device_unusable(
                        device.name(),
                        format!("claimed by {}", existing.owner()),
                    ))
                }
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn is_claim_usable(&self, device: &BlockDevice, owner: &str) -> Result<bool> {
        let name = BlockDeviceClaim::name_for(device.name());
        let Some(claim) = self.claims().get_opt(&name).await? else {
            return Ok(false);
        };
        // The device is re-read so a binding made since the gate fetched it counts
        let current = self.get_device(device.name()).await?;
        Ok(current.is_usable_under(&claim, owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn test_status_mapping() {
        assert!(is_status(&api_error(409, "Conflict"), 409));
        assert!(!is_status(&api_error(500, "InternalError"), 409));

        match not_found("BlockDevice", "bd-1", api_error(404, "NotFound")) {
            Error::ResourceNotFound { kind, name } => {
                assert_eq!(kind, "BlockDevice");
                assert_eq!(name, "bd-1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            not_found("BlockDevice", "bd-1", api_error(500, "InternalError")),
            Error::Kube(_)
        ));
    }
}
