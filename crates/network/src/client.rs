use libp2p::gossipsub::{IdentTopic, TopicHash};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use libp2p_stream::Control;
use tokio::sync::{mpsc, oneshot};

use crate::stream::Stream;
use crate::Command;

/// Handle for talking to the [`EventLoop`](crate::EventLoop). Cheap to
/// clone; every task that needs the network holds one.
#[derive(Clone)]
pub struct Client {
    peer_id: PeerId,
    sender: mpsc::Sender<Command>,
    control: Control,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(peer_id: PeerId, sender: mpsc::Sender<Command>, control: Control) -> Self {
        Self {
            peer_id,
            sender,
            control,
        }
    }

    /// Client wired to nothing, for tests that only exercise bookkeeping
    /// around the network rather than the network itself. Any command sent
    /// through it panics.
    #[cfg(any(test, feature = "testing"))]
    pub fn detached(peer_id: PeerId) -> Self {
        let (sender, _receiver) = mpsc::channel(1);

        Self {
            peer_id,
            sender,
            control: libp2p_stream::Behaviour::new().new_control(),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub async fn listen_on(&self, addr: Multiaddr) -> eyre::Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::ListenOn { addr, sender })
            .await
            .expect("command receiver not to be dropped");
        receiver.await.expect("sender not to be dropped")
    }

    pub async fn dial(&self, peer_addr: Multiaddr) -> eyre::Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Dial { peer_addr, sender })
            .await
            .expect("command receiver not to be dropped");
        receiver.await.expect("sender not to be dropped")
    }

    pub async fn subscribe(&self, topic: IdentTopic) -> eyre::Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Subscribe { topic, sender })
            .await
            .expect("command receiver not to be dropped");
        receiver.await.expect("sender not to be dropped")
    }

    pub async fn publish(&self, topic: TopicHash, data: Vec<u8>) -> eyre::Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(Command::Publish {
                topic,
                data,
                sender,
            })
            .await
            .expect("command receiver not to be dropped");
        receiver.await.expect("sender not to be dropped")
    }

    /// Opens a protocol stream to `peer_id`, dialing it first if no
    /// connection is alive.
    pub async fn open_stream(
        &self,
        peer_id: PeerId,
        protocol: StreamProtocol,
    ) -> eyre::Result<Stream> {
        let stream = self
            .control
            .clone()
            .open_stream(peer_id, protocol)
            .await
            .map_err(|err| eyre::eyre!("failed to open stream: {err}"))?;

        Ok(Stream::new(stream))
    }
}
