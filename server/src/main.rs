// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use braid_server::api::build_router;
use braid_server::config::ServerConfig;
use braid_server::coordinator::Coordinator;
use braid_server::dispatcher::{Dispatcher, HttpTransport};
use braid_storage::cluster::HttpCluster;
use braid_storage::http::HttpStore;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about = "braid repair server", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "BRAID_LISTEN", default_value = "0.0.0.0:7070")]
    listen: String,

    /// Address peers reach this node at
    #[arg(long, env = "BRAID_ADVERTISE", default_value = "127.0.0.1:7070")]
    advertise: String,

    /// Block store HTTP API
    #[arg(long, env = "BRAID_STORE", default_value = "http://127.0.0.1:5001")]
    store: String,

    /// Cluster membership HTTP API
    #[arg(long, env = "BRAID_CLUSTER", default_value = "http://127.0.0.1:9094")]
    cluster: String,

    /// Discovery endpoint receiving repair metrics
    #[arg(long, env = "BRAID_DISCOVERY")]
    discovery: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "braid_server=info,braid_entangler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServerConfig {
        listen: cli.listen,
        advertise: cli.advertise,
        store_url: cli.store,
        cluster_url: cli.cluster,
        discovery: cli.discovery,
    };

    tracing::info!(listen = %config.listen, "starting braid repair server");

    let store = HttpStore::new(config.store_url.clone());
    let cluster = Arc::new(HttpCluster::new(config.cluster_url.clone()));
    let dispatcher = Dispatcher::new(Arc::new(HttpTransport::new()), config.advertise.clone());

    let (coordinator, collab_rx) = Coordinator::new(
        config.advertise.clone(),
        config.discovery.clone(),
        store,
        cluster,
        dispatcher,
    );
    coordinator.clone().spawn_worker(collab_rx);

    let router = build_router(coordinator);
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
