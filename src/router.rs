//! Router contract: key-to-node dispatch for distributed deployments
//! (§4.K).
//!
//! Grounded on the teacher's `strategy.rs` `BackingStore` async-trait shape
//! (a pluggable collaborator behind the cache core). Forwarding to remote
//! nodes is out of scope per §1; only the local node's dispatch and the
//! `cross_slot` multi-key check are implemented here.

use async_trait::async_trait;

use crate::error::{CacheError, CacheResult};

/// Maps keys to nodes and (optionally) accepts topology changes.
#[async_trait]
pub trait Router<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Every node this router currently knows about.
    fn nodes(&self) -> Vec<String>;

    /// The node responsible for `key`.
    fn route(&self, key: &K) -> String;

    /// Add a node to the topology. Returns `InvalidRouter` if this router
    /// doesn't support dynamic attach.
    async fn attach(&self, _node: String) -> CacheResult<()> {
        Err(CacheError::InvalidRouter(
            "this router does not support attach".into(),
        ))
    }

    /// Remove a node from the topology. Returns `InvalidRouter` if this
    /// router doesn't support dynamic detach.
    async fn detach(&self, _node: &str) -> CacheResult<()> {
        Err(CacheError::InvalidRouter(
            "this router does not support detach".into(),
        ))
    }
}

/// The trivial single-node router: every key routes to the local node.
/// This is the in-scope implementation; anything beyond it (forwarding to
/// remote peers) is an external collaborator per §1.
pub struct LocalRouter {
    node_id: String,
}

impl LocalRouter {
    /// Construct a router whose sole node is `node_id`.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

#[async_trait]
impl<K> Router<K> for LocalRouter
where
    K: Send + Sync,
{
    fn nodes(&self) -> Vec<String> {
        vec![self.node_id.clone()]
    }

    fn route(&self, _key: &K) -> String {
        self.node_id.clone()
    }
}

/// Verify every key in a multi-key operation resolves to the same node,
/// failing with `cross_slot` otherwise (§4.K).
pub fn require_single_node<K>(router: &dyn Router<K>, keys: &[K]) -> CacheResult<()>
where
    K: Send + Sync,
{
    let mut iter = keys.iter().map(|k| router.route(k));
    let Some(first) = iter.next() else {
        return Ok(());
    };
    if iter.any(|node| node != first) {
        return Err(CacheError::CrossSlot);
    }
    Ok(())
}
