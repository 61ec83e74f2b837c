use crate::ids::ConnectionId;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared liveness flag for a transport connection.
///
/// The transport owns the connection and calls [`close`](Self::close) when the peer goes
/// away; the dispatcher checks [`is_active`](Self::is_active) before flushing a response so a
/// dead channel is reported as a time-to-first-byte rejection instead of a silent drop.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    active: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection state seen by connection-scoped filters
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    pub handle: ConnectionHandle,
    pub attributes: HashMap<String, Value>,
}

impl ConnectionContext {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            handle: ConnectionHandle::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }
}
