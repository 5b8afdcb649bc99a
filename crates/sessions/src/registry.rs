use std::collections::HashMap;
use std::sync::Arc;

use clara_common::new_id;
use tokio::sync::RwLock;

/// An adapter capability (streaming, attachments, reactions, embeds,
/// threads, editing, buttons, cards, ...). Stored as free-form strings
/// rather than an enum so an adapter can declare a capability the gateway
/// doesn't yet recognize without failing registration.
pub type Capability = String;

/// A live connected adapter instance.
#[derive(Debug, Clone)]
pub struct NodeSession {
    pub node_id: String,
    pub session_id: String,
    pub conn_id: u64,
    pub platform: String,
    pub capabilities: Vec<Capability>,
    pub connected_at_ms: u64,
    pub last_ping_ms: u64,
}

/// A node's identity preserved across a socket close, to support
/// reconnection with the same `session_id` within the preservation window.
#[derive(Debug, Clone)]
struct PreservedNode {
    node_id: String,
    platform: String,
    capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub is_reconnection: bool,
}

#[derive(Default)]
struct Inner {
    /// Live nodes, keyed by node_id.
    nodes: HashMap<String, NodeSession>,
    /// conn_id -> node_id, to resolve `unregister(conn)`.
    by_conn: HashMap<u64, String>,
    /// session_id -> node_id, kept alive across disconnects so a
    /// reconnecting adapter can be recognized.
    sessions: HashMap<String, String>,
    /// session_id -> preserved identity, populated on socket close and
    /// consulted (then discarded) on the next REGISTER with that session.
    preserved: HashMap<String, PreservedNode>,
}

/// Registry of connected adapter nodes. All mutations are serialized
/// through a single async `RwLock`; reads take a shared lock so concurrent
/// broadcast/list operations don't block each other.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected adapter. If `prior_session_id` names a
    /// preserved entry, the previous identity is restored under the new
    /// connection and `is_reconnection` is true; otherwise a fresh session
    /// is minted.
    pub async fn register(
        &self,
        conn_id: u64,
        node_id: String,
        platform: String,
        capabilities: Vec<Capability>,
        prior_session_id: Option<String>,
        now_ms: u64,
    ) -> (String, RegisterOutcome) {
        let mut inner = self.inner.write().await;

        let (session_id, is_reconnection) = match prior_session_id
            .as_deref()
            .and_then(|sid| inner.preserved.remove(sid).map(|p| (sid.to_string(), p)))
        {
            Some((sid, _preserved)) => (sid, true),
            None => (new_id(), false),
        };

        inner.sessions.insert(session_id.clone(), node_id.clone());
        inner.by_conn.insert(conn_id, node_id.clone());
        inner.nodes.insert(
            node_id.clone(),
            NodeSession {
                node_id,
                session_id: session_id.clone(),
                conn_id,
                platform,
                capabilities,
                connected_at_ms: now_ms,
                last_ping_ms: now_ms,
            },
        );

        (session_id, RegisterOutcome { is_reconnection })
    }

    /// Socket closed. The live node record is removed but the
    /// `session_id -> identity` binding is preserved so a future REGISTER
    /// with that session id is recognized as a reconnection.
    pub async fn unregister_by_conn(&self, conn_id: u64) -> Option<NodeSession> {
        let mut inner = self.inner.write().await;
        let node_id = inner.by_conn.remove(&conn_id)?;
        let node = inner.nodes.remove(&node_id)?;
        inner.preserved.insert(
            node.session_id.clone(),
            PreservedNode {
                node_id: node.node_id.clone(),
                platform: node.platform.clone(),
                capabilities: node.capabilities.clone(),
            },
        );
        Some(node)
    }

    /// Adapter explicitly unregistered (not just a dropped socket): destroy
    /// the session entirely, including the preserved reconnection window.
    pub async fn forget_session(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(node_id) = inner.sessions.remove(session_id) {
            inner.nodes.remove(&node_id);
        }
        inner.preserved.remove(session_id);
    }

    pub async fn update_ping(&self, conn_id: u64, now_ms: u64) {
        let mut inner = self.inner.write().await;
        if let Some(node_id) = inner.by_conn.get(&conn_id).cloned()
            && let Some(node) = inner.nodes.get_mut(&node_id)
        {
            node.last_ping_ms = now_ms;
        }
    }

    pub async fn get(&self, node_id: &str) -> Option<NodeSession> {
        self.inner.read().await.nodes.get(node_id).cloned()
    }

    pub async fn get_nodes_by_platform(&self, platform: &str) -> Vec<NodeSession> {
        self.inner
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.platform == platform)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_unregister_then_register_is_reconnection() {
        let reg = NodeRegistry::new();
        let (session_id, outcome) = reg
            .register(1, "discord-1".into(), "discord".into(), vec![], None, 1000)
            .await;
        assert!(!outcome.is_reconnection);

        reg.unregister_by_conn(1).await;
        assert!(reg.get("discord-1").await.is_none());

        let (session_id_2, outcome2) = reg
            .register(
                2,
                "discord-1".into(),
                "discord".into(),
                vec![],
                Some(session_id.clone()),
                2000,
            )
            .await;
        assert!(outcome2.is_reconnection);
        assert_eq!(session_id, session_id_2);
    }

    #[tokio::test]
    async fn fresh_registration_without_prior_session_is_not_a_reconnection() {
        let reg = NodeRegistry::new();
        let (_sid, outcome) = reg
            .register(1, "cli-1".into(), "cli".into(), vec![], None, 0)
            .await;
        assert!(!outcome.is_reconnection);
    }

    #[tokio::test]
    async fn filters_nodes_by_platform() {
        let reg = NodeRegistry::new();
        reg.register(1, "discord-1".into(), "discord".into(), vec![], None, 0)
            .await;
        reg.register(2, "cli-1".into(), "cli".into(), vec![], None, 0)
            .await;
        let discord_nodes = reg.get_nodes_by_platform("discord").await;
        assert_eq!(discord_nodes.len(), 1);
        assert_eq!(discord_nodes[0].node_id, "discord-1");
    }
}
