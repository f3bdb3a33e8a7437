//! Interactive shell: one line of stdin per action.
//!
//! An empty line re-announces the local files; anything else is treated as
//! a path to fetch from the first peer advertising it.

use std::time::Instant;

use eyre::OptionExt;
use libp2p::PeerId;
use meshsync_transfer::{receive_files, wire, TransferSummary};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::{announce, Node};

/// Dispatches one input line. Long-running work is spawned so the node
/// keeps serving streams while a download runs.
pub fn handle_line(node: &Node, line: String) {
    let input = line.trim().to_owned();

    if input.is_empty() {
        info!("Manual refresh triggered");

        let node = node.clone();
        let _handle = node.tracker().clone().spawn(async move {
            if let Err(err) = announce::announce_local_files(&node).await {
                warn!(%err, "Failed to announce local files");
            }
        });

        return;
    }

    let provider = match node.find_provider(&input) {
        Ok(provider) => provider,
        Err(err) => {
            warn!(%err, "Failed to look up providers");
            return;
        }
    };

    let Some(peer_id) = provider else {
        println!("'{input}' is not in any known announcement");
        announce::show_available_files(node);
        return;
    };

    let node = node.clone();
    let _handle = node.tracker().clone().spawn(async move {
        download(node, peer_id, input).await;
    });
}

async fn download(node: Node, peer_id: PeerId, path: String) {
    info!(%peer_id, path, "Requesting path from peer");

    let started = Instant::now();

    match request_path(&node, peer_id, &path).await {
        Ok(summary) => {
            let elapsed = started.elapsed();
            let kib = summary.bytes as f64 / 1024.0;
            let speed = kib / elapsed.as_secs_f64().max(f64::EPSILON);

            info!(
                files = summary.files.len(),
                "Saved under {}: {kib:.2} KiB in {:.2}s ({speed:.2} KiB/s)",
                node.config().staging_root,
                elapsed.as_secs_f64(),
            );
        }
        Err(err) => error!(%peer_id, path, %err, "File request failed"),
    }
}

/// Opens a `/transfer/1` stream to `peer_id` and receives the reply into
/// the staging root, honoring the node's encryption flag.
pub async fn request_path(
    node: &Node,
    peer_id: PeerId,
    path: &str,
) -> eyre::Result<TransferSummary> {
    let encrypt = node.config().encrypt;

    let key = encrypt
        .then(|| {
            node.config()
                .transfer_key
                .ok_or_eyre("encryption enabled but no key configured")
        })
        .transpose()?;

    let mut stream = node
        .network()
        .open_stream(peer_id, meshsync_network::TRANSFER_PROTOCOL)
        .await?;

    wire::write_request(&mut stream, path, encrypt).await?;

    let summary = receive_files(
        &mut stream,
        node.config().staging_root.as_std_path(),
        key.as_ref(),
        node.progress(),
    )
    .await?;

    stream.shutdown().await?;

    Ok(summary)
}
