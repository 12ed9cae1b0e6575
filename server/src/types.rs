// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use braid_entangler::getter::CounterSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

/// One peer's slice of a collaborative repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabPeerInfo {
    pub name: String,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub status: RepairStatus,
    /// Leaf lattice index to whether the peer repaired it.
    pub allocated_blocks: HashMap<usize, bool>,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
}

impl CollabPeerInfo {
    pub fn new(name: String, allocated: &[usize]) -> Self {
        Self {
            name,
            start_time: SystemTime::now(),
            end_time: None,
            status: RepairStatus::Pending,
            allocated_blocks: allocated.iter().map(|leaf| (*leaf, false)).collect(),
            counters: CounterSnapshot::default(),
        }
    }
}

/// Per-file record of a collaborative repair; also the metrics document
/// posted to the discovery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabRepairData {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub status: RepairStatus,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub depth: u32,
    /// Address to report overall completion to, when set.
    pub origin: Option<String>,
    pub peers: HashMap<String, CollabPeerInfo>,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
}

impl CollabRepairData {
    pub fn new(req: &CollabRepairRequest) -> Self {
        Self {
            file_cid: req.file_cid.clone(),
            meta_cid: req.meta_cid.clone(),
            status: RepairStatus::Pending,
            start_time: SystemTime::now(),
            end_time: None,
            depth: req.depth,
            origin: req.origin.clone(),
            peers: HashMap::new(),
            counters: CounterSnapshot::default(),
        }
    }
}

/// Per-file record of a strand repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandRepairData {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub strand: usize,
    pub status: RepairStatus,
    pub depth: u32,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

// --- wire bodies ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabRepairRequest {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub depth: u32,
    #[serde(default)]
    pub origin: Option<String>,
    pub num_peers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRepairRequest {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub depth: u32,
    pub origin: String,
    pub failed_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandRepairRequest {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub strand: usize,
    pub depth: u32,
}

/// Result a peer posts back after a unit repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRepairReport {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub origin: String,
    pub repair_status: HashMap<usize, bool>,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
}

/// Overall collab outcome posted to the origin of the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollabRepairReport {
    #[serde(rename = "fileCID")]
    pub file_cid: String,
    #[serde(rename = "metaCID")]
    pub meta_cid: String,
    pub origin: String,
    pub repair_status: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_status_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&RepairStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        let status: RepairStatus = serde_json::from_str("\"FAILURE\"").unwrap();
        assert_eq!(status, RepairStatus::Failure);
    }

    #[test]
    fn collab_record_serializes_counters_inline() {
        let req = CollabRepairRequest {
            file_cid: "bafyfile".to_string(),
            meta_cid: "bafymeta".to_string(),
            depth: 3,
            origin: None,
            num_peers: 2,
        };
        let record = CollabRepairData::new(&req);
        let json = serde_json::to_value(&record).unwrap();
        // CID spelling preserved, counters flattened to the top level
        assert!(json.get("fileCID").is_some());
        assert!(json.get("dataBlocksFetched").is_some());
        assert!(json.get("counters").is_none());
    }

    #[test]
    fn unit_repair_report_round_trips() {
        let mut repair_status = HashMap::new();
        repair_status.insert(4usize, true);
        repair_status.insert(9usize, false);
        let report = UnitRepairReport {
            file_cid: "f".to_string(),
            meta_cid: "m".to_string(),
            origin: "10.0.0.1:7070".to_string(),
            repair_status,
            counters: CounterSnapshot::default(),
        };
        let json = serde_json::to_string(&report).unwrap();
        let parsed: UnitRepairReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.repair_status.get(&4), Some(&true));
        assert_eq!(parsed.repair_status.get(&9), Some(&false));
    }
}
