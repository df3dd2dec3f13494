use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::messages::ServerEvent;
use crate::models::UserId;
use crate::presence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live transport session of a user. The writer half of the socket drains
/// the receiving end of `tx`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user: UserId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(user: UserId, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        ConnectionHandle {
            id: ConnectionId::new(),
            user,
            tx,
        }
    }

    /// Queues an event for this connection. Returns false once the socket
    /// writer has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// An event addressed to the connection that was registered when the event
/// was produced.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub target: ConnectionHandle,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn new(target: ConnectionHandle, event: ServerEvent) -> Self {
        Outbound { target, event }
    }

    pub fn dispatch(self) {
        let user = self.target.user.clone();
        if !self.target.send(self.event) {
            debug!("Dropping event for {}: connection closed", user);
        }
    }
}

pub fn dispatch_all(outbound: Vec<Outbound>) {
    for out in outbound {
        out.dispatch();
    }
}

/// Live mapping of user id to its most recent connection.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle`, replacing any earlier connection of the same user,
    /// and re-broadcasts presence. Returns the superseded handle.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        let user = handle.user.clone();
        let previous = connections.insert(user.clone(), handle);
        match &previous {
            Some(old) => info!("User {} reconnected, superseding connection {}", user, old.id),
            None => info!("User {} is online", user),
        }
        // Unbounded sends never await, so broadcasting under the lock keeps
        // presence frames in mutation order.
        Self::publish(&connections);
        previous
    }

    /// Removes the entry for `user` only if it still belongs to `connection`.
    /// A disconnect from a superseded session leaves the newer one in place.
    pub async fn unregister(&self, user: &UserId, connection: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user).map(|current| current.id == connection) {
            Some(true) => {
                connections.remove(user);
                info!("User {} is offline", user);
                Self::publish(&connections);
                true
            }
            Some(false) => {
                debug!("Ignoring stale disconnect {} for {}", connection, user);
                false
            }
            None => false,
        }
    }

    pub async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(user).cloned()
    }

    pub async fn snapshot(&self) -> BTreeSet<UserId> {
        self.connections.read().await.keys().cloned().collect()
    }

    fn publish(connections: &HashMap<UserId, ConnectionHandle>) {
        let snapshot: BTreeSet<UserId> = connections.keys().cloned().collect();
        let online = presence::online_users(&snapshot);
        presence::broadcast(connections.values(), &online);
    }
}
