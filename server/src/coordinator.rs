// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use braid_entangler::getter::CounterSnapshot;
use braid_entangler::repairer::{self, Repairer};
use braid_storage::cluster::ClusterMembership;
use braid_storage::Storage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::SystemTime;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::dispatcher::{partition_shards, Dispatcher};
use crate::types::{
    CollabPeerInfo, CollabRepairData, CollabRepairReport, CollabRepairRequest, RepairStatus,
    StrandRepairData, StrandRepairRequest, UnitRepairReport, UnitRepairRequest,
};

/// Peers recruited for the collab phase of a strand repair.
const STRAND_REPAIR_PEERS: usize = 3;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("A repair of file {0} is already pending")]
    AlreadyPending(String),

    #[error("No collaborative repair record for file {0}")]
    UnknownRecord(String),

    #[error("Peer {0} did not take part in the repair of file {1}")]
    UnknownPeer(String, String),

    #[error("Strand {0} is out of range")]
    InvalidStrand(usize),

    #[error("Only {accepted} of {wanted} shards could be placed on peers")]
    InsufficientPeers { accepted: usize, wanted: usize },

    #[error("Repair failed: {0}")]
    Repair(#[from] repairer::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-file state machine for collaborative, unit and strand repair.
///
/// Every record sits behind its own mutex: report handling, peer-map writes
/// and completion checks for one file are serialized, while different files
/// proceed independently.
pub struct Coordinator<S: Storage> {
    address: String,
    discovery_address: Option<String>,
    repairer: Repairer<S>,
    cluster: Arc<dyn ClusterMembership>,
    dispatcher: Dispatcher,
    collab_data: Mutex<HashMap<String, Arc<Mutex<CollabRepairData>>>>,
    strand_data: Mutex<HashMap<String, Arc<Mutex<StrandRepairData>>>>,
    /// Files whose availability monitoring is paused while a strand repair
    /// runs; cleared whenever the repair exits.
    monitor_paused: StdMutex<HashSet<String>>,
    collab_queue: mpsc::Sender<CollabRepairRequest>,
}

impl<S: Storage + 'static> Coordinator<S> {
    /// Creates the coordinator and the queue feeding its background worker.
    /// Call [`Coordinator::spawn_worker`] with the returned receiver.
    pub fn new(
        address: String,
        discovery_address: Option<String>,
        store: S,
        cluster: Arc<dyn ClusterMembership>,
        dispatcher: Dispatcher,
    ) -> (Arc<Self>, mpsc::Receiver<CollabRepairRequest>) {
        let (tx, rx) = mpsc::channel(16);
        let coordinator = Arc::new(Self {
            address,
            discovery_address,
            repairer: Repairer::new(store),
            cluster,
            dispatcher,
            collab_data: Mutex::new(HashMap::new()),
            strand_data: Mutex::new(HashMap::new()),
            monitor_paused: StdMutex::new(HashSet::new()),
            collab_queue: tx,
        });
        (coordinator, rx)
    }

    /// Consumes queued collab operations (enqueued by strand repairs) on a
    /// background task.
    pub fn spawn_worker(self: Arc<Self>, mut rx: mpsc::Receiver<CollabRepairRequest>) {
        let coordinator = self;
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                if let Err(e) = coordinator.begin_collab(&op).await {
                    warn!(file = %op.file_cid, error = %e, "queued collab repair rejected");
                    continue;
                }
                coordinator.run_collab(op).await;
            }
        });
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Guards against a concurrent pending repair of the same file and
    /// creates the record. Acceptance is synchronous; the repair itself runs
    /// in [`Coordinator::run_collab`].
    pub async fn begin_collab(&self, req: &CollabRepairRequest) -> Result<(), Error> {
        let mut data = self.collab_data.lock().await;
        if let Some(existing) = data.get(&req.file_cid) {
            if existing.lock().await.status == RepairStatus::Pending {
                return Err(Error::AlreadyPending(req.file_cid.clone()));
            }
        }
        info!(file = %req.file_cid, peers = req.num_peers, "starting collaborative repair");
        data.insert(
            req.file_cid.clone(),
            Arc::new(Mutex::new(CollabRepairData::new(req))),
        );
        Ok(())
    }

    /// Runs the collab operation created by [`Coordinator::begin_collab`]:
    /// enumerates failed leaves, shards them across peers and returns;
    /// completion is driven by incoming unit-repair reports.
    pub async fn run_collab(&self, req: CollabRepairRequest) {
        if let Err(e) = self.drive_collab(&req).await {
            warn!(file = %req.file_cid, error = %e, "collaborative repair failed to start");
            self.finish_collab(&req.file_cid, RepairStatus::Failure).await;
        }
    }

    async fn drive_collab(&self, req: &CollabRepairRequest) -> Result<(), Error> {
        let entry = self.collab_entry(&req.file_cid).await?;

        let (leaves, counters) = self
            .repairer
            .retrieve_failed_leaves(&req.file_cid, &req.meta_cid, req.depth)
            .await?;
        {
            let mut record = entry.lock().await;
            record.counters = counters;
        }
        info!(file = %req.file_cid, failed = leaves.len(), "enumerated failed leaves");

        if leaves.is_empty() {
            self.finish_collab(&req.file_cid, RepairStatus::Success).await;
            return Ok(());
        }

        let peers = self
            .dispatcher
            .candidate_peers(self.cluster.as_ref(), &req.file_cid)
            .await?;
        let num_peers = req.num_peers.min(peers.len()).min(leaves.len());
        if num_peers == 0 {
            return Err(Error::InsufficientPeers {
                accepted: 0,
                wanted: req.num_peers,
            });
        }

        let shards = partition_shards(&leaves, num_peers);
        info!(file = %req.file_cid, num_peers, "placing shards");

        // Rotate through the peer ring until every shard is accepted. A full
        // cycle without an acceptance means the cluster cannot host the
        // repair, and the operation fails instead of spinning.
        let mut accepted = 0;
        let mut attempts_since_accept = 0;
        let mut cursor = 0;
        let mut assigned: HashSet<String> = HashSet::new();
        while accepted < num_peers {
            if attempts_since_accept >= peers.len() {
                return Err(Error::InsufficientPeers {
                    accepted,
                    wanted: num_peers,
                });
            }
            let peer = &peers[cursor % peers.len()];
            cursor += 1;
            attempts_since_accept += 1;
            if assigned.contains(&peer.address) {
                continue;
            }

            let request = UnitRepairRequest {
                file_cid: req.file_cid.clone(),
                meta_cid: req.meta_cid.clone(),
                depth: req.depth,
                origin: self.address.clone(),
                failed_indices: shards[accepted].clone(),
            };
            match self.dispatcher.send_unit_repair(peer, &request).await {
                Ok(200) => {
                    // keyed by address: completion reports identify their
                    // sender by the address they advertise as origin
                    let mut record = entry.lock().await;
                    record.peers.insert(
                        peer.address.clone(),
                        CollabPeerInfo::new(peer.name.clone(), &request.failed_indices),
                    );
                    info!(
                        file = %req.file_cid,
                        peer = %peer.name,
                        leaves = request.failed_indices.len(),
                        "shard accepted"
                    );
                    assigned.insert(peer.address.clone());
                    accepted += 1;
                    attempts_since_accept = 0;
                }
                Ok(status) => {
                    debug!(peer = %peer.name, status, "peer declined unit repair");
                }
                Err(e) => {
                    debug!(peer = %peer.name, error = %e, "peer unreachable, rotating");
                }
            }
        }
        Ok(())
    }

    /// Peer-local handling of a unit-repair request: recover the listed
    /// leaves and post the result back to the origin.
    pub async fn start_unit_repair(&self, req: UnitRepairRequest) {
        info!(
            file = %req.file_cid,
            leaves = req.failed_indices.len(),
            depth = req.depth,
            "starting unit repair"
        );
        let (repair_status, counters) = match self
            .repairer
            .repair_failed_leaves(&req.file_cid, &req.meta_cid, req.depth, &req.failed_indices)
            .await
        {
            Ok((results, counters)) => (results, counters),
            Err(e) => {
                warn!(file = %req.file_cid, error = %e, "unit repair failed");
                (
                    req.failed_indices.iter().map(|leaf| (*leaf, false)).collect(),
                    CounterSnapshot::default(),
                )
            }
        };

        let report = UnitRepairReport {
            file_cid: req.file_cid.clone(),
            meta_cid: req.meta_cid.clone(),
            origin: self.address.clone(),
            repair_status,
            counters,
        };
        if let Err(e) = self.dispatcher.report_unit_repair(&req.origin, &report).await {
            warn!(origin = %req.origin, error = %e, "failed to report unit repair");
        }
    }

    /// Applies a peer's unit-repair report and, once the last peer checks
    /// in, closes the collab operation. Handling is serialized per file by
    /// the record mutex.
    pub async fn report_unit_repair(&self, report: UnitRepairReport) -> Result<(), Error> {
        let entry = self.collab_entry(&report.file_cid).await?;
        let mut record = entry.lock().await;
        if record.status != RepairStatus::Pending {
            debug!(file = %report.file_cid, "report for a finished repair, dropping");
            return Ok(());
        }

        let peer = record
            .peers
            .get_mut(&report.origin)
            .ok_or_else(|| Error::UnknownPeer(report.origin.clone(), report.file_cid.clone()))?;

        peer.end_time = Some(SystemTime::now());
        peer.counters = report.counters.clone();
        let mut all_repaired = true;
        let mut repaired = 0;
        for (leaf, ok) in &report.repair_status {
            all_repaired = all_repaired && *ok;
            if *ok {
                if let Some(slot) = peer.allocated_blocks.get_mut(leaf) {
                    *slot = true;
                    repaired += 1;
                }
            }
        }
        peer.status = if all_repaired {
            RepairStatus::Success
        } else {
            RepairStatus::Failure
        };
        info!(
            file = %report.file_cid,
            peer = %report.origin,
            repaired,
            total = report.repair_status.len(),
            "unit repair reported"
        );

        let all_done = record
            .peers
            .values()
            .all(|p| p.status != RepairStatus::Pending);
        if !all_done {
            return Ok(());
        }
        let all_succeeded = record
            .peers
            .values()
            .all(|p| p.status == RepairStatus::Success);
        record.end_time = Some(SystemTime::now());
        record.status = if all_succeeded {
            RepairStatus::Success
        } else {
            RepairStatus::Failure
        };
        let snapshot = record.clone();
        drop(record);

        self.emit_completion(snapshot).await;
        Ok(())
    }

    /// Marks the collab record terminal and emits completion side effects.
    async fn finish_collab(&self, file_cid: &str, status: RepairStatus) {
        let entry = match self.collab_entry(file_cid).await {
            Ok(entry) => entry,
            Err(_) => return,
        };
        let mut record = entry.lock().await;
        if record.status != RepairStatus::Pending {
            return;
        }
        record.status = status;
        record.end_time = Some(SystemTime::now());
        let snapshot = record.clone();
        drop(record);
        self.emit_completion(snapshot).await;
    }

    /// Reports metrics to the discovery address and the overall outcome to
    /// the operation's origin, when either is configured.
    async fn emit_completion(&self, record: CollabRepairData) {
        info!(
            file = %record.file_cid,
            status = ?record.status,
            "collaborative repair finished"
        );
        if let Some(discovery) = &self.discovery_address {
            if let Err(e) = self.dispatcher.report_metrics(discovery, &record).await {
                warn!(error = %e, "failed to report metrics");
            }
        }
        let Some(origin) = record.origin.clone() else {
            debug!(file = %record.file_cid, "no origin to report back to");
            return;
        };
        let report = CollabRepairReport {
            file_cid: record.file_cid.clone(),
            meta_cid: record.meta_cid.clone(),
            origin: self.address.clone(),
            repair_status: record.status == RepairStatus::Success,
        };
        if let Err(e) = self.dispatcher.report_collab_repair(&origin, &report).await {
            warn!(%origin, error = %e, "failed to report collab completion");
        }
    }

    /// Starts a strand repair: guard, record, and enqueue the collab phase
    /// with this node as origin.
    pub async fn start_strand_repair(&self, req: StrandRepairRequest) -> Result<(), Error> {
        if req.strand >= 3 {
            return Err(Error::InvalidStrand(req.strand));
        }
        let mut data = self.strand_data.lock().await;
        if let Some(existing) = data.get(&req.file_cid) {
            if existing.lock().await.status == RepairStatus::Pending {
                return Err(Error::AlreadyPending(req.file_cid.clone()));
            }
        }
        info!(file = %req.file_cid, strand = req.strand, "starting strand repair");
        data.insert(
            req.file_cid.clone(),
            Arc::new(Mutex::new(StrandRepairData {
                file_cid: req.file_cid.clone(),
                meta_cid: req.meta_cid.clone(),
                strand: req.strand,
                status: RepairStatus::Pending,
                depth: req.depth,
                start_time: SystemTime::now(),
                end_time: None,
            })),
        );
        drop(data);
        self.monitor_paused
            .lock()
            .unwrap()
            .insert(req.file_cid.clone());

        // the strand's data must be whole before re-encoding parity
        let op = CollabRepairRequest {
            file_cid: req.file_cid.clone(),
            meta_cid: req.meta_cid,
            depth: req.depth,
            origin: Some(self.address.clone()),
            num_peers: STRAND_REPAIR_PEERS,
        };
        self.collab_queue
            .send(op)
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("collab queue closed: {}", e)))?;
        Ok(())
    }

    /// Continues a strand repair once its collab phase reports completion.
    /// Monitoring state for the file is reset on every exit path.
    pub async fn report_collab_repair(&self, report: CollabRepairReport) -> Result<(), Error> {
        let entry = {
            let data = self.strand_data.lock().await;
            data.get(&report.file_cid).cloned()
        };
        let Some(entry) = entry else {
            // not strand-repairing this file; nothing to continue
            self.reset_monitor(&report.file_cid);
            return Ok(());
        };

        let mut record = entry.lock().await;
        if record.status != RepairStatus::Pending {
            self.reset_monitor(&report.file_cid);
            return Ok(());
        }

        if !report.repair_status {
            warn!(file = %report.file_cid, "collab phase failed, aborting strand repair");
            record.status = RepairStatus::Failure;
            record.end_time = Some(SystemTime::now());
            self.reset_monitor(&report.file_cid);
            return Ok(());
        }

        let outcome = self
            .repairer
            .repair_strand(
                &record.file_cid,
                &record.meta_cid,
                record.strand,
                record.depth,
            )
            .await;
        match outcome {
            Ok(manifest_cid) => {
                record.status = RepairStatus::Success;
                if let Err(e) = self
                    .dispatcher
                    .pin_repaired(self.cluster.as_ref(), &manifest_cid)
                    .await
                {
                    warn!(cid = %manifest_cid, error = %e, "failed to re-pin strand manifest");
                }
                info!(file = %record.file_cid, strand = record.strand, "strand repair finished");
            }
            Err(e) => {
                warn!(file = %record.file_cid, error = %e, "strand re-encoding failed");
                record.status = RepairStatus::Failure;
            }
        }
        record.end_time = Some(SystemTime::now());
        self.reset_monitor(&report.file_cid);
        Ok(())
    }

    fn reset_monitor(&self, file_cid: &str) {
        self.monitor_paused.lock().unwrap().remove(file_cid);
    }

    pub fn is_monitor_paused(&self, file_cid: &str) -> bool {
        self.monitor_paused.lock().unwrap().contains(file_cid)
    }

    async fn collab_entry(&self, file_cid: &str) -> Result<Arc<Mutex<CollabRepairData>>, Error> {
        self.collab_data
            .lock()
            .await
            .get(file_cid)
            .cloned()
            .ok_or_else(|| Error::UnknownRecord(file_cid.to_string()))
    }

    /// Snapshot of the collab record for a file, if any.
    pub async fn collab_record(&self, file_cid: &str) -> Option<CollabRepairData> {
        let entry = self.collab_entry(file_cid).await.ok()?;
        let record = entry.lock().await;
        Some(record.clone())
    }

    /// Snapshot of the strand record for a file, if any.
    pub async fn strand_record(&self, file_cid: &str) -> Option<StrandRepairData> {
        let entry = {
            let data = self.strand_data.lock().await;
            data.get(file_cid).cloned()
        }?;
        let record = entry.lock().await;
        Some(record.clone())
    }
}
