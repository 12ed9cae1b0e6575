// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use braid_storage::Storage;
use std::sync::Arc;
use tracing::{info, warn};

use crate::coordinator::{Coordinator, Error};
use crate::types::{
    CollabRepairReport, CollabRepairRequest, StrandRepairRequest, UnitRepairReport,
    UnitRepairRequest,
};

/// Builds the repair API router. All endpoints accept JSON only and answer
/// 200 on acceptance; completion is asynchronous.
pub fn build_router<S: Storage + 'static>(coordinator: Arc<Coordinator<S>>) -> Router {
    Router::new()
        .route("/triggerCollabRepair", post(trigger_collab_repair::<S>))
        .route("/triggerUnitRepair", post(trigger_unit_repair::<S>))
        .route("/triggerStrandRepair", post(trigger_strand_repair::<S>))
        .route("/reportUnitRepair", post(report_unit_repair::<S>))
        .route("/reportCollabRepair", post(report_collab_repair::<S>))
        .route("/reportMetrics", post(report_metrics))
        .with_state(coordinator)
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::AlreadyPending(_) => StatusCode::CONFLICT,
        Error::UnknownRecord(_) | Error::UnknownPeer(_, _) | Error::InvalidStrand(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn trigger_collab_repair<S: Storage + 'static>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    Json(req): Json<CollabRepairRequest>,
) -> StatusCode {
    if req.file_cid.is_empty() || req.meta_cid.is_empty() || req.num_peers == 0 {
        return StatusCode::BAD_REQUEST;
    }
    match coordinator.begin_collab(&req).await {
        Ok(()) => {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_collab(req).await });
            StatusCode::OK
        }
        Err(e) => {
            warn!(error = %e, "collab repair rejected");
            status_for(&e)
        }
    }
}

async fn trigger_unit_repair<S: Storage + 'static>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    Json(req): Json<UnitRepairRequest>,
) -> StatusCode {
    if req.file_cid.is_empty() || req.meta_cid.is_empty() || req.origin.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    tokio::spawn(async move { coordinator.start_unit_repair(req).await });
    StatusCode::OK
}

async fn trigger_strand_repair<S: Storage + 'static>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    Json(req): Json<StrandRepairRequest>,
) -> StatusCode {
    if req.file_cid.is_empty() || req.meta_cid.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match coordinator.start_strand_repair(req).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "strand repair rejected");
            status_for(&e)
        }
    }
}

async fn report_unit_repair<S: Storage + 'static>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    Json(report): Json<UnitRepairReport>,
) -> StatusCode {
    match coordinator.report_unit_repair(report).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "unit repair report rejected");
            status_for(&e)
        }
    }
}

async fn report_collab_repair<S: Storage + 'static>(
    State(coordinator): State<Arc<Coordinator<S>>>,
    Json(report): Json<CollabRepairReport>,
) -> StatusCode {
    tokio::spawn(async move {
        if let Err(e) = coordinator.report_collab_repair(report).await {
            warn!(error = %e, "collab repair report failed");
        }
    });
    StatusCode::OK
}

/// Telemetry sink: accept and log the posted record.
async fn report_metrics(Json(record): Json<serde_json::Value>) -> StatusCode {
    info!(target: "braid::metrics", %record, "metrics report received");
    StatusCode::OK
}
