//! Node startup and the main event loop.

use meshsync_network::{NetworkConfig, NetworkEvent, Stream};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{announce, interactive_cli, journal, Node, NodeConfig};

/// Grace period for the gossipsub mesh to form before the first
/// announcement.
const ANNOUNCE_WARMUP: Duration = Duration::from_secs(15);

/// Brings the node up and runs until cancellation (Ctrl-C) or network
/// shutdown. Per-stream and per-peer work runs in tracked tasks that are
/// drained before returning.
pub async fn start(config: NodeConfig, network_config: NetworkConfig) -> eyre::Result<()> {
    let (client, mut events, event_loop) = meshsync_network::run(&network_config).await?;

    info!("Peer ID: {}", client.local_peer_id());

    let store = journal::load(config.journal.as_std_path()).await?;

    let node = Node::new(config, client, store);

    let token = node.cancellation();
    let tracker = node.tracker().clone();

    let _event_loop = tracker.spawn({
        let token = token.clone();
        async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = event_loop.run() => {}
            }
        }
    });

    node.network().subscribe(announce::topic()).await?;

    let _seeded = node.seed_local_versions().await?;

    let _announce = tracker.spawn({
        let node = node.clone();
        async move {
            tokio::time::sleep(ANNOUNCE_WARMUP).await;

            if let Err(err) = announce::announce_local_files(&node).await {
                warn!(%err, "Initial announcement failed");
            }
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Node is up; empty line re-announces, a path downloads it, Ctrl-C exits");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                token.cancel();
                break;
            }
            () = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_network_event(&node, event),
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => interactive_cli::handle_line(&node, line),
                Ok(None) => stdin_open = false,
                Err(err) => warn!(%err, "Input error"),
            },
        }
    }

    tracker.close();
    tracker.wait().await;

    Ok(())
}

fn handle_network_event(node: &Node, event: NetworkEvent) {
    match event {
        NetworkEvent::PeerDiscovered { peer_id, addr } => {
            info!(%peer_id, %addr, "Peer discovered");

            if let Err(err) = node.record_peer(peer_id, addr) {
                warn!(%err, "Failed to record peer");
            }

            let node = node.clone();
            let _handle = node.tracker().clone().spawn(async move {
                if let Err(err) = node.initiate_sync(peer_id).await {
                    error!(%peer_id, %err, "Metadata sync failed");
                }
            });
        }
        NetworkEvent::StreamOpened {
            peer_id,
            stream,
            protocol,
        } if protocol == meshsync_network::METADATA_PROTOCOL => {
            let node = node.clone();
            let _handle = node.tracker().clone().spawn(async move {
                if let Err(err) = node.respond_sync(peer_id, *stream).await {
                    error!(%peer_id, %err, "Metadata exchange failed");
                }
            });
        }
        NetworkEvent::StreamOpened {
            peer_id,
            stream,
            protocol,
        } if protocol == meshsync_network::TRANSFER_PROTOCOL => {
            let node = node.clone();
            let _handle = node.tracker().clone().spawn(async move {
                if let Err(err) = serve_transfer(&node, *stream).await {
                    error!(%peer_id, %err, "Transfer request failed");
                }
            });
        }
        NetworkEvent::StreamOpened {
            peer_id, protocol, ..
        } => {
            warn!(%peer_id, %protocol, "Dropping stream for unknown protocol");
        }
        NetworkEvent::Message { message } => announce::handle_announcement(node, &message),
        NetworkEvent::ListeningOn { address } => debug!(%address, "Listening"),
        NetworkEvent::Subscribed { peer_id, topic } => {
            debug!(%peer_id, %topic, "Peer subscribed");
        }
    }
}

/// Serves one incoming `/transfer/1` stream from the shared root.
async fn serve_transfer(node: &Node, mut stream: Stream) -> eyre::Result<()> {
    meshsync_transfer::handle_request(
        &mut stream,
        node.config().shared_root.as_std_path(),
        node.config().transfer_key.as_ref(),
    )
    .await?;

    stream.shutdown().await?;

    Ok(())
}
