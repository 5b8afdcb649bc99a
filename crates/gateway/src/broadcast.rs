//! Proactive delivery bridge: broadcasts a message to every connected node
//! of a platform (scheduled-task output, adapter-initiated pushes), and the
//! [`MessageSink`](clara_scheduler::MessageSink) impl that lets
//! `clara-scheduler` drive it without depending on this crate.

use async_trait::async_trait;
use clara_common::new_id;
use clara_protocol::GatewayFrame;
use clara_scheduler::MessageSink;
use tracing::warn;

use crate::state::GatewayState;

impl GatewayState {
    /// Sends `content` as a `PROACTIVE_MESSAGE` frame to every node
    /// registered under `platform`, returning the number delivered.
    pub async fn broadcast_to_platform(
        &self,
        platform: &str,
        user_id: &str,
        channel_id: &str,
        content: &str,
        purpose: Option<&str>,
    ) -> usize {
        let nodes = self.registry.get_nodes_by_platform(platform).await;
        let clients = self.clients.read().await;
        let mut count = 0;
        for node in &nodes {
            let Some(client) = clients.get(&node.conn_id) else {
                continue;
            };
            let frame = GatewayFrame::ProactiveMessage {
                id: new_id(),
                user_id: user_id.to_string(),
                channel_id: channel_id.to_string(),
                content: content.to_string(),
                purpose: purpose.map(str::to_string),
            };
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(node_id = %node.node_id, error = %e, "failed to serialize proactive message");
                    continue;
                }
            };
            if client.send(&json) {
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl MessageSink for GatewayState {
    async fn broadcast_to_platform(&self, platform: &str, user_id: &str, channel_id: &str, content: &str) -> usize {
        GatewayState::broadcast_to_platform(self, platform, user_id, channel_id, content, None).await
    }
}
