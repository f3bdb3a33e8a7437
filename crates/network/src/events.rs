use libp2p::{gossipsub, identify, mdns, ping};
use owo_colors::OwoColorize;
use tracing::{debug, error, trace};

use crate::types::NetworkEvent;
use crate::EventLoop;

pub trait EventHandler<E> {
    async fn handle(&mut self, event: E);
}

impl EventHandler<mdns::Event> for EventLoop {
    async fn handle(&mut self, event: mdns::Event) {
        debug!("{}: {:?}", "mdns".yellow(), event);

        match event {
            mdns::Event::Discovered(peers) => {
                for (peer_id, addr) in peers {
                    debug!(%peer_id, %addr, "Discovered peer via mdns");

                    let _known = self.swarm.add_peer_address(peer_id, addr.clone());

                    if let Err(err) = self.swarm.dial(addr.clone()) {
                        error!(%peer_id, ?err, "Failed to dial discovered peer");
                        continue;
                    }

                    if let Err(err) = self
                        .event_sender
                        .send(NetworkEvent::PeerDiscovered { peer_id, addr })
                        .await
                    {
                        error!(%err, "Failed to send peer discovered event");
                    }
                }
            }
            mdns::Event::Expired(_) => {}
        }
    }
}

impl EventHandler<gossipsub::Event> for EventLoop {
    async fn handle(&mut self, event: gossipsub::Event) {
        debug!("{}: {:?}", "gossipsub".yellow(), event);

        match event {
            gossipsub::Event::Message { message, .. } => {
                if let Err(err) = self
                    .event_sender
                    .send(NetworkEvent::Message { message })
                    .await
                {
                    error!(%err, "Failed to send message event");
                }
            }
            gossipsub::Event::Subscribed { peer_id, topic } => {
                if let Err(err) = self
                    .event_sender
                    .send(NetworkEvent::Subscribed { peer_id, topic })
                    .await
                {
                    error!(%err, "Failed to send subscribed event");
                }
            }
            _ => {}
        }
    }
}

impl EventHandler<identify::Event> for EventLoop {
    async fn handle(&mut self, event: identify::Event) {
        trace!("{}: {:?}", "identify".yellow(), event);
    }
}

impl EventHandler<ping::Event> for EventLoop {
    async fn handle(&mut self, event: ping::Event) {
        trace!("{}: {:?}", "ping".yellow(), event);
    }
}
