// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A member of the storage cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub name: String,
    /// host:port of the peer's repair endpoint.
    pub address: String,
}

/// Pinning mode for `add_pin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Direct,
    Recursive,
}

impl PinMode {
    fn as_str(&self) -> &'static str {
        match self {
            PinMode::Direct => "direct",
            PinMode::Recursive => "recursive",
        }
    }
}

/// Cluster membership and pin management.
#[async_trait]
pub trait ClusterMembership: Send + Sync {
    /// Lists all peers in the cluster, including this node.
    async fn peers(&self) -> Result<Vec<Peer>>;

    /// Returns the names of peers currently pinning `cid`.
    async fn pin_allocations(&self, cid: &str) -> Result<Vec<String>>;

    /// Pins `cid` with the given replication factor.
    async fn add_pin(&self, cid: &str, replication: u32, mode: PinMode) -> Result<()>;
}

#[derive(Deserialize)]
struct PeerEntry {
    id: String,
    peername: String,
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Deserialize)]
struct PinEntry {
    #[serde(default)]
    allocations: Vec<String>,
}

/// Connector to an IPFS-cluster style membership API.
pub struct HttpCluster {
    client: reqwest::Client,
    base_url: String,
    // Round-robin over peer ids so pin allocations spread across the cluster.
    allocation_idx: AtomicUsize,
    peer_ids: Mutex<Vec<String>>,
    names: Mutex<HashMap<String, String>>,
}

impl HttpCluster {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            allocation_idx: AtomicUsize::new(0),
            peer_ids: Mutex::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn next_allocation_target(&self) -> Option<String> {
        let ids = self.peer_ids.lock().unwrap();
        if ids.is_empty() {
            return None;
        }
        let idx = self.allocation_idx.fetch_add(1, Ordering::Relaxed) % ids.len();
        Some(ids[idx].clone())
    }
}

#[async_trait]
impl ClusterMembership for HttpCluster {
    async fn peers(&self) -> Result<Vec<Peer>> {
        let entries: Vec<PeerEntry> = self
            .client
            .get(self.url("/peers"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let peers: Vec<Peer> = entries
            .into_iter()
            .map(|e| Peer {
                address: e.addresses.first().cloned().unwrap_or_default(),
                id: e.id,
                name: e.peername,
            })
            .collect();

        let mut ids = self.peer_ids.lock().unwrap();
        *ids = peers.iter().map(|p| p.id.clone()).collect();
        let mut names = self.names.lock().unwrap();
        for p in &peers {
            names.insert(p.id.clone(), p.name.clone());
        }
        Ok(peers)
    }

    async fn pin_allocations(&self, cid: &str) -> Result<Vec<String>> {
        let entry: PinEntry = self
            .client
            .get(self.url(&format!("/pins/{}", cid)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let names = self.names.lock().unwrap();
        Ok(entry
            .allocations
            .iter()
            .map(|id| names.get(id).cloned().unwrap_or_else(|| id.clone()))
            .collect())
    }

    async fn add_pin(&self, cid: &str, replication: u32, mode: PinMode) -> Result<()> {
        let target = self
            .next_allocation_target()
            .ok_or_else(|| anyhow!("no known peers to allocate pin to"))?;
        let url = self.url(&format!(
            "/pins/ipfs/{}?mode={}&replication-min={}&replication-max={}&user-allocations={}",
            cid,
            mode.as_str(),
            replication,
            replication,
            target
        ));
        self.client.post(url).send().await?.error_for_status()?;
        Ok(())
    }
}

/// In-memory cluster used in tests.
pub struct FakeCluster {
    peers: Mutex<Vec<Peer>>,
    allocations: Mutex<HashMap<String, Vec<String>>>,
    pins: Arc<Mutex<Vec<(String, u32)>>>,
}

impl FakeCluster {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self {
            peers: Mutex::new(peers),
            allocations: Mutex::new(HashMap::new()),
            pins: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_allocations(&self, cid: &str, peer_names: Vec<String>) {
        self.allocations
            .lock()
            .unwrap()
            .insert(cid.to_string(), peer_names);
    }

    pub fn pinned(&self) -> Vec<(String, u32)> {
        self.pins.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterMembership for FakeCluster {
    async fn peers(&self) -> Result<Vec<Peer>> {
        Ok(self.peers.lock().unwrap().clone())
    }

    async fn pin_allocations(&self, cid: &str) -> Result<Vec<String>> {
        Ok(self
            .allocations
            .lock()
            .unwrap()
            .get(cid)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_pin(&self, cid: &str, replication: u32, _mode: PinMode) -> Result<()> {
        self.pins
            .lock()
            .unwrap()
            .push((cid.to_string(), replication));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: usize) -> Peer {
        Peer {
            id: format!("id-{}", n),
            name: format!("peer-{}", n),
            address: format!("10.0.0.{}:7070", n),
        }
    }

    #[tokio::test]
    async fn fake_cluster_lists_peers() -> Result<()> {
        let cluster = FakeCluster::new(vec![peer(1), peer(2)]);
        let peers = cluster.peers().await?;
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].name, "peer-1");
        Ok(())
    }

    #[tokio::test]
    async fn fake_cluster_tracks_pins_and_allocations() -> Result<()> {
        let cluster = FakeCluster::new(vec![peer(1)]);
        cluster.set_allocations("bafyfile", vec!["peer-1".to_string()]);

        assert_eq!(
            cluster.pin_allocations("bafyfile").await?,
            vec!["peer-1".to_string()]
        );
        assert!(cluster.pin_allocations("bafyother").await?.is_empty());

        cluster.add_pin("bafyfile", 2, PinMode::Recursive).await?;
        assert_eq!(cluster.pinned(), vec![("bafyfile".to_string(), 2)]);
        Ok(())
    }
}
