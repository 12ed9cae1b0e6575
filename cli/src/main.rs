// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

/// Command-line client for braid entangled storage.
///
/// Supports uploading and downloading files against a block store, and
/// triggering collaborative or strand repairs on a repair server. Uses
/// `clap` for argument parsing and `stderrlog` for logging.
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use stderrlog::Timestamp;

use braid_entangler::repairer::{DownloadOptions, Repairer};
use braid_entangler::uploader::Uploader;
use braid_entangler::Config;
use braid_storage::http::HttpStore;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Block store HTTP API
    #[arg(long, env = "BRAID_STORE", default_value = "http://127.0.0.1:5001")]
    store: String,
}

#[derive(Subcommand)]
enum Commands {
    Upload(UploadArgs),
    Download(DownloadArgs),
    CollabRepair(CollabRepairArgs),
    StrandRepair(StrandRepairArgs),
}

#[derive(Args)]
struct UploadArgs {
    #[arg(short, long)]
    file: String,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    cid: String,
    #[arg(long)]
    metadata_cid: Option<String>,
    #[arg(short, long)]
    output: String,
    /// Recursion depth allowed during recovery
    #[arg(long, default_value_t = 3)]
    depth: u32,
    /// Re-publish recovered chunks back to the store
    #[arg(long)]
    reupload: bool,
}

#[derive(Args)]
struct CollabRepairArgs {
    /// Repair server address, host:port
    #[arg(long)]
    server: String,
    #[arg(long)]
    cid: String,
    #[arg(long)]
    metadata_cid: String,
    #[arg(long, default_value_t = 3)]
    depth: u32,
    #[arg(long, default_value_t = 3)]
    peers: usize,
}

#[derive(Args)]
struct StrandRepairArgs {
    /// Repair server address, host:port
    #[arg(long)]
    server: String,
    #[arg(long)]
    cid: String,
    #[arg(long)]
    metadata_cid: String,
    #[arg(long)]
    strand: usize,
    #[arg(long, default_value_t = 3)]
    depth: u32,
}

async fn trigger(url: String, body: serde_json::Value) -> anyhow::Result<()> {
    let response = reqwest::Client::new()
        .post(&url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    anyhow::ensure!(
        response.status().is_success(),
        "server answered {}",
        response.status()
    );
    println!("repair accepted");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    stderrlog::new()
        .module(module_path!())
        .timestamp(Timestamp::Millisecond)
        .init()
        .unwrap();

    let store = HttpStore::new(cli.store.clone());

    match cli.command {
        Commands::Upload(args) => {
            let bytes = tokio::fs::read(&args.file)
                .await
                .with_context(|| format!("failed to read {}", args.file))?;
            let uploader = Uploader::new(store, Config::default());
            let result = uploader.upload(bytes).await?;
            println!(
                "uploaded file. CID: {}, Meta: {}",
                result.original_file_cid, result.metadata_cid
            );
        }
        Commands::Download(args) => {
            let repairer = Repairer::new(store);
            let (data, repaired, _) = repairer
                .download(
                    &args.cid,
                    args.metadata_cid.as_deref(),
                    args.depth,
                    DownloadOptions {
                        reupload: args.reupload,
                        ..DownloadOptions::default()
                    },
                )
                .await?;
            tokio::fs::write(&args.output, &data).await?;
            if repaired {
                println!("downloaded file (recovered)");
            } else {
                println!("downloaded file");
            }
        }
        Commands::CollabRepair(args) => {
            trigger(
                format!("http://{}/triggerCollabRepair", args.server),
                serde_json::json!({
                    "fileCID": args.cid,
                    "metaCID": args.metadata_cid,
                    "depth": args.depth,
                    "numPeers": args.peers,
                }),
            )
            .await?;
        }
        Commands::StrandRepair(args) => {
            trigger(
                format!("http://{}/triggerStrandRepair", args.server),
                serde_json::json!({
                    "fileCID": args.cid,
                    "metaCID": args.metadata_cid,
                    "strand": args.strand,
                    "depth": args.depth,
                }),
            )
            .await?;
        }
    }

    Ok(())
}
