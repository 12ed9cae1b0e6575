// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;

use crate::storage::{cid_of, Error, Storage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for an IPFS-style block HTTP API.
///
/// Only the raw block endpoints are used; DAG traversal happens on top of
/// `get_raw` in the entangler crate.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct BlockPutResponse {
    #[serde(rename = "Key")]
    key: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-request timeout. Short timeouts are used while probing
    /// block availability during repair.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Storage for HttpStore {
    async fn add_raw(&self, bytes: impl Into<Bytes> + Send) -> Result<String> {
        let bytes = bytes.into();
        let expected = cid_of(&bytes);
        let resp = self
            .client
            .post(self.url("/api/v0/block/put?format=raw&mhtype=sha2-256"))
            .timeout(self.timeout)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        let parsed: BlockPutResponse = resp.json().await?;
        if parsed.key != expected {
            return Err(anyhow!(
                "store returned cid {} for block hashing to {}",
                parsed.key,
                expected
            ));
        }
        Ok(parsed.key)
    }

    async fn get_raw(&self, cid: &str) -> Result<Bytes, Error> {
        let resp = self
            .client
            .post(self.url(&format!("/api/v0/block/get?arg={}", cid)))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(cid.to_string())
                } else {
                    Error::Other(e.into())
                }
            })?;

        match resp.status() {
            s if s.is_success() => {
                let bytes = resp.bytes().await.map_err(|e| Error::Other(e.into()))?;
                if cid_of(&bytes) != cid {
                    return Err(Error::DigestMismatch(cid.to_string()));
                }
                Ok(bytes)
            }
            reqwest::StatusCode::NOT_FOUND => Err(Error::BlockNotFound(cid.to_string())),
            s => Err(Error::Other(anyhow!("block/get returned status {}", s))),
        }
    }
}
