//! Concurrent peer registry: single-writer-per-key, many-reader.
//!
//! Generalizes the teacher's `Arc<DashMap<SocketAddr, Connection>>` (`rakethyst`'s
//! `RakNetListener`) from socket-address keys to server-minted client ids.

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::connection::ConnectionHandle;

#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<DashMap<String, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        debug!(target: "chatnet::registry", "registering {}", handle.client_id);
        self.inner.insert(handle.client_id.clone(), handle);
    }

    pub fn remove(&self, client_id: &str) -> Option<ConnectionHandle> {
        let removed = self.inner.remove(client_id).map(|(_, h)| h);
        if removed.is_some() {
            debug!(target: "chatnet::registry", "removed {client_id}");
        }
        removed
    }

    pub fn get(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.inner.get(client_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Every currently-registered handle, snapshotted. Callers only act on a
    /// handle while its own running flag says it's still live.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }

    /// All running peers except `origin`, for broadcast fan-out.
    pub fn others(&self, origin: Option<&str>) -> Vec<ConnectionHandle> {
        self.inner
            .iter()
            .filter(|e| e.value().is_running())
            .filter(|e| origin != Some(e.key().as_str()))
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(id: &str) -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(8);
        ConnectionHandle::new(id.into(), "127.0.0.1:1".parse().unwrap(), tx)
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let reg = Registry::new();
        reg.insert(handle("a"));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("a").is_some());
        reg.remove("a");
        assert!(reg.is_empty());
    }

    #[test]
    fn others_excludes_the_origin() {
        let reg = Registry::new();
        reg.insert(handle("a"));
        reg.insert(handle("b"));
        let others = reg.others(Some("a"));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].client_id, "b");
    }
}
