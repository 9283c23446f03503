//! Named broadcast groups.
//!
//! Sessions join a group on connect and leave on disconnect. A publish
//! serializes once and fans the frame out to every member except the
//! optional originator. Members that keep overflowing their queues are
//! evicted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use filedeck_core::ConnectionId;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::protocol::ServerMessage;

/// Group every session joins.
pub const DEFAULT_GROUP: &str = "file_manager_group";

/// Maximum total lifetime drops before a slow client is evicted.
pub const MAX_TOTAL_DROPS: u64 = 100;

type Members = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Process-wide registry of broadcast groups.
#[derive(Debug, Default)]
pub struct BroadcastGroup {
    groups: RwLock<HashMap<String, Members>>,
}

impl BroadcastGroup {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `group`. Re-joining replaces the entry.
    pub async fn join(&self, group: &str, connection: Arc<ClientConnection>) {
        let mut groups = self.groups.write().await;
        let _ = groups
            .entry(group.to_string())
            .or_default()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a connection from `group`. Empty groups are dropped.
    pub async fn leave(&self, group: &str, id: &ConnectionId) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(group) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = groups.remove(group);
            }
        }
    }

    /// Deliver `message` to every member of `group` except `exclude`.
    ///
    /// Returns how many members accepted the frame.
    pub async fn publish(
        &self,
        group: &str,
        message: &ServerMessage,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let json = match message.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(group, error = %e, "failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut to_evict = Vec::new();
        {
            let groups = self.groups.read().await;
            let Some(members) = groups.get(group) else {
                return 0;
            };
            for conn in members.values() {
                if exclude == Some(&conn.id) {
                    continue;
                }
                if conn.send(Arc::clone(&json)) {
                    delivered += 1;
                } else {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    let drops = conn.drop_count();
                    if drops >= MAX_TOTAL_DROPS {
                        warn!(conn_id = %conn.id, group, drops, "evicting slow client");
                        to_evict.push(conn.id.clone());
                    } else {
                        warn!(conn_id = %conn.id, group, total_drops = drops, "broadcast dropped (queue full)");
                    }
                }
            }
            debug!(group, recipients = delivered, "broadcast published");
        }

        for id in &to_evict {
            self.leave(group, id).await;
        }
        delivered
    }

    /// Members currently in `group`.
    pub async fn member_count(&self, group: &str) -> usize {
        self.groups.read().await.get(group).map_or(0, HashMap::len)
    }

    /// Whether `id` is a member of `group`.
    pub async fn contains(&self, group: &str, id: &ConnectionId) -> bool {
        self.groups
            .read()
            .await
            .get(group)
            .is_some_and(|m| m.contains_key(id))
    }

    /// Distinct connections across all groups.
    pub async fn connection_count(&self) -> usize {
        let groups = self.groups.read().await;
        groups
            .values()
            .flat_map(HashMap::keys)
            .collect::<HashSet<_>>()
            .len()
    }
}
