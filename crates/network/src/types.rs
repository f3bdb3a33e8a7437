pub use libp2p::gossipsub::{IdentTopic, Message, TopicHash};
pub use libp2p::identity::PeerId;
use libp2p::{Multiaddr, StreamProtocol};

use crate::stream::Stream;

#[derive(Debug)]
pub enum NetworkEvent {
    ListeningOn {
        address: Multiaddr,
    },
    /// A peer showed up on the local network (mdns). The event loop has
    /// already started dialing it.
    PeerDiscovered {
        peer_id: PeerId,
        addr: Multiaddr,
    },
    Subscribed {
        peer_id: PeerId,
        topic: TopicHash,
    },
    Message {
        message: Message,
    },
    /// A remote peer opened a stream to us; `protocol` tells which handler
    /// it belongs to.
    StreamOpened {
        peer_id: PeerId,
        stream: Box<Stream>,
        protocol: StreamProtocol,
    },
}
