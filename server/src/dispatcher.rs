// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;
use braid_storage::cluster::{ClusterMembership, Peer, PinMode};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::types::{CollabRepairData, CollabRepairReport, UnitRepairReport, UnitRepairRequest};

/// Unit-repair triggering runs on a short fuse so one slow peer does not
/// stall shard placement; a timeout simply rotates to the next peer.
pub const UNIT_REPAIR_TIMEOUT: Duration = Duration::from_millis(100);
/// Reports and metrics can afford a regular timeout.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(10);
/// Replication factor for artifacts re-pinned after a repair.
pub const REPAIR_PIN_REPLICATION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Request to {0} failed: {1}")]
    Failed(String, String),
}

/// Outbound JSON POSTs, abstracted so the coordinator can be exercised with
/// a scripted transport in tests.
#[async_trait]
pub trait RepairTransport: Send + Sync {
    /// Posts a JSON body and returns the HTTP status code.
    async fn post_json(
        &self,
        url: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<u16, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepairTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(url.to_string())
                } else {
                    TransportError::Failed(url.to_string(), e.to_string())
                }
            })?;
        Ok(response.status().as_u16())
    }
}

/// Splits `leaves` into `num_peers` contiguous shards of `len / num_peers`
/// leaves, the remainder going to the last shard.
pub fn partition_shards(leaves: &[usize], num_peers: usize) -> Vec<Vec<usize>> {
    let per_peer = leaves.len() / num_peers;
    (0..num_peers)
        .map(|i| {
            if i == num_peers - 1 {
                leaves[i * per_peer..].to_vec()
            } else {
                leaves[i * per_peer..(i + 1) * per_peer].to_vec()
            }
        })
        .collect()
}

/// Chooses peers and fans repair requests out to them. Stateless; the only
/// shared mutable state is the cluster connector's pin rotation.
pub struct Dispatcher {
    transport: Arc<dyn RepairTransport>,
    self_address: String,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn RepairTransport>, self_address: String) -> Self {
        Self {
            transport,
            self_address,
        }
    }

    /// Cluster peers other than this node, shuffled uniformly, with peers
    /// already pinning the file's content sorted to the front.
    pub async fn candidate_peers(
        &self,
        cluster: &dyn ClusterMembership,
        file_cid: &str,
    ) -> anyhow::Result<Vec<Peer>> {
        let mut peers: Vec<Peer> = cluster
            .peers()
            .await?
            .into_iter()
            .filter(|p| p.address != self.self_address)
            .collect();

        let pinning: HashSet<String> = match cluster.pin_allocations(file_cid).await {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                debug!(error = %e, "pin allocations unavailable, ignoring preference");
                HashSet::new()
            }
        };

        peers.shuffle(&mut rand::thread_rng());
        // stable sort keeps the shuffle within each group
        peers.sort_by_key(|p| !pinning.contains(&p.name));
        Ok(peers)
    }

    /// Re-pins a repaired artifact. Pin placement rotates across peers via
    /// the cluster connector's allocation index, which is the only mutable
    /// state behind the dispatcher.
    pub async fn pin_repaired(
        &self,
        cluster: &dyn ClusterMembership,
        cid: &str,
    ) -> anyhow::Result<()> {
        cluster
            .add_pin(cid, REPAIR_PIN_REPLICATION, PinMode::Recursive)
            .await
    }

    pub async fn send_unit_repair(
        &self,
        peer: &Peer,
        request: &UnitRepairRequest,
    ) -> Result<u16, TransportError> {
        self.post(
            &format!("http://{}/triggerUnitRepair", peer.address),
            request,
            UNIT_REPAIR_TIMEOUT,
        )
        .await
    }

    pub async fn report_unit_repair(
        &self,
        origin: &str,
        report: &UnitRepairReport,
    ) -> Result<u16, TransportError> {
        self.post(
            &format!("http://{}/reportUnitRepair", origin),
            report,
            REPORT_TIMEOUT,
        )
        .await
    }

    pub async fn report_collab_repair(
        &self,
        origin: &str,
        report: &CollabRepairReport,
    ) -> Result<u16, TransportError> {
        self.post(
            &format!("http://{}/reportCollabRepair", origin),
            report,
            REPORT_TIMEOUT,
        )
        .await
    }

    pub async fn report_metrics(
        &self,
        discovery: &str,
        record: &CollabRepairData,
    ) -> Result<u16, TransportError> {
        self.post(
            &format!("http://{}/reportMetrics", discovery),
            record,
            REPORT_TIMEOUT,
        )
        .await
    }

    async fn post<T: Serialize>(
        &self,
        url: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<u16, TransportError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| TransportError::Failed(url.to_string(), e.to_string()))?;
        self.transport.post_json(url, body, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use braid_storage::cluster::FakeCluster;

    fn peer(n: usize) -> Peer {
        Peer {
            id: format!("id-{}", n),
            name: format!("peer-{}", n),
            address: format!("10.0.0.{}:7070", n),
        }
    }

    #[test]
    fn shards_cover_input_disjointly() {
        let leaves: Vec<usize> = (0..23).collect();
        for num_peers in 1..=7 {
            let shards = partition_shards(&leaves, num_peers);
            assert_eq!(shards.len(), num_peers);

            let mut seen = HashSet::new();
            for shard in &shards {
                for leaf in shard {
                    assert!(seen.insert(*leaf), "leaf {} allocated twice", leaf);
                }
            }
            assert_eq!(seen.len(), leaves.len(), "num_peers={}", num_peers);

            // all shards but the last share a size; the last absorbs the rest
            let per_peer = leaves.len() / num_peers;
            for shard in &shards[..num_peers - 1] {
                assert_eq!(shard.len(), per_peer);
            }
            assert_eq!(
                shards[num_peers - 1].len(),
                per_peer + leaves.len() % num_peers
            );
        }
    }

    #[test]
    fn even_split_has_equal_shards() {
        let leaves: Vec<usize> = (0..12).collect();
        let shards = partition_shards(&leaves, 3);
        assert!(shards.iter().all(|s| s.len() == 4));
    }

    struct NullTransport;

    #[async_trait]
    impl RepairTransport for NullTransport {
        async fn post_json(
            &self,
            _url: &str,
            _body: Vec<u8>,
            _timeout: Duration,
        ) -> Result<u16, TransportError> {
            Ok(200)
        }
    }

    #[tokio::test]
    async fn pin_repaired_uses_the_repair_replication_factor() -> Result<()> {
        let cluster = FakeCluster::new(vec![peer(1), peer(2)]);
        let dispatcher = Dispatcher::new(Arc::new(NullTransport), peer(1).address);

        dispatcher.pin_repaired(&cluster, "bafymanifest").await?;
        assert_eq!(
            cluster.pinned(),
            vec![("bafymanifest".to_string(), REPAIR_PIN_REPLICATION)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn candidate_peers_excludes_self_and_prefers_pinners() -> Result<()> {
        let cluster = FakeCluster::new(vec![peer(1), peer(2), peer(3), peer(4)]);
        cluster.set_allocations("bafyfile", vec!["peer-3".to_string()]);

        let dispatcher = Dispatcher::new(Arc::new(NullTransport), peer(1).address);
        let candidates = dispatcher.candidate_peers(&cluster, "bafyfile").await?;

        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|p| p.name != "peer-1"));
        assert_eq!(candidates[0].name, "peer-3", "pinning peer comes first");
        Ok(())
    }
}
