// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

/// Runtime configuration of a repair server node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub listen: String,
    /// Address other peers reach this node at; used as the origin of
    /// outbound repair requests.
    pub advertise: String,
    /// Block store HTTP API.
    pub store_url: String,
    /// Cluster membership HTTP API.
    pub cluster_url: String,
    /// Discovery endpoint receiving repair metrics, if any.
    pub discovery: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7070".to_string(),
            advertise: "127.0.0.1:7070".to_string(),
            store_url: "http://127.0.0.1:5001".to_string(),
            cluster_url: "http://127.0.0.1:9094".to_string(),
            discovery: None,
        }
    }
}
