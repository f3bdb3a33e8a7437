//! libp2p transport for meshsync nodes.
//!
//! [`run`] builds the swarm and hands back a [`Client`] for commands, a
//! receiver of [`NetworkEvent`]s, and the [`EventLoop`] the caller spawns.
//! Streams are keyed by protocol: incoming `/metadata/1` and `/transfer/1`
//! streams surface as [`NetworkEvent::StreamOpened`] with the negotiated
//! protocol attached, and the application layer decides what to do with the
//! raw bytes.

use futures_util::StreamExt;
use libp2p::identity::Keypair;
use libp2p::multiaddr::{self, Multiaddr};
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::{gossipsub, identify, mdns, noise, ping, tcp, tls, yamux, PeerId, SwarmBuilder};
use libp2p_stream::IncomingStreams;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tracing::{debug, error, info, trace};

pub mod client;
pub mod config;
mod events;
pub mod stream;
pub mod types;

pub use client::Client;
pub use config::NetworkConfig;
pub use stream::{Stream, METADATA_PROTOCOL, TRANSFER_PROTOCOL};
pub use types::NetworkEvent;

const PROTOCOL_VERSION: &str = concat!("/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(NetworkBehaviour)]
struct Behaviour {
    identify: identify::Behaviour,
    mdns: Toggle<mdns::tokio::Behaviour>,
    gossipsub: gossipsub::Behaviour,
    ping: ping::Behaviour,
    stream: libp2p_stream::Behaviour,
}

/// Builds the swarm and starts listening. The returned [`EventLoop`] must be
/// spawned by the caller before the [`Client`] is used.
pub async fn run(
    config: &NetworkConfig,
) -> eyre::Result<(Client, mpsc::Receiver<NetworkEvent>, EventLoop)> {
    let peer_id = config.identity.public().to_peer_id();

    let mut swarm = build_swarm(&config.identity, config.discovery.mdns, peer_id)?;

    for addr in &config.swarm.listen {
        let _listener = swarm.listen_on(addr.clone())?;
    }

    let mut control = swarm.behaviour().stream.new_control();

    let incoming_metadata = control.accept(METADATA_PROTOCOL)?;
    let incoming_transfer = control.accept(TRANSFER_PROTOCOL)?;

    let (command_sender, command_receiver) = mpsc::channel(32);
    let (event_sender, event_receiver) = mpsc::channel(32);

    let client = Client::new(peer_id, command_sender, control);

    let event_loop = EventLoop {
        swarm,
        command_receiver,
        event_sender,
        incoming_metadata,
        incoming_transfer,
    };

    Ok((client, event_receiver, event_loop))
}

fn build_swarm(
    identity: &Keypair,
    use_mdns: bool,
    peer_id: PeerId,
) -> eyre::Result<Swarm<Behaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(identity.clone())
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            (tls::Config::new, noise::Config::new),
            yamux::Config::default,
        )?
        .with_quic()
        .with_behaviour(|key| {
            Ok(Behaviour {
                identify: identify::Behaviour::new(identify::Config::new(
                    PROTOCOL_VERSION.to_owned(),
                    key.public(),
                )),
                mdns: use_mdns
                    .then_some(())
                    .map(|()| mdns::Behaviour::new(mdns::Config::default(), peer_id))
                    .transpose()?
                    .into(),
                gossipsub: gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub::Config::default(),
                )?,
                ping: ping::Behaviour::default(),
                stream: libp2p_stream::Behaviour::new(),
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(30)))
        .build();

    Ok(swarm)
}

pub struct EventLoop {
    swarm: Swarm<Behaviour>,
    command_receiver: mpsc::Receiver<Command>,
    event_sender: mpsc::Sender<NetworkEvent>,
    incoming_metadata: IncomingStreams,
    incoming_transfer: IncomingStreams,
}

impl EventLoop {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.next() => {
                    self.handle_swarm_event(event.expect("swarm stream to be infinite")).await;
                }
                command = self.command_receiver.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some((peer_id, stream)) = self.incoming_metadata.next() => {
                    self.handle_incoming_stream(peer_id, stream, METADATA_PROTOCOL).await;
                }
                Some((peer_id, stream)) = self.incoming_transfer.next() => {
                    self.handle_incoming_stream(peer_id, stream, TRANSFER_PROTOCOL).await;
                }
            }
        }
    }

    async fn handle_incoming_stream(
        &mut self,
        peer_id: PeerId,
        stream: libp2p::Stream,
        protocol: libp2p::StreamProtocol,
    ) {
        debug!(%peer_id, %protocol, "Incoming stream");

        if let Err(err) = self
            .event_sender
            .send(NetworkEvent::StreamOpened {
                peer_id,
                stream: Box::new(Stream::new(stream)),
                protocol,
            })
            .await
        {
            error!(%err, "Failed to send stream opened event");
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event).await,
            SwarmEvent::NewListenAddr { address, .. } => {
                let local_peer_id = *self.swarm.local_peer_id();
                let address = address.with(multiaddr::Protocol::P2p(local_peer_id));

                info!("Listening on {address}");

                if let Err(err) = self
                    .event_sender
                    .send(NetworkEvent::ListeningOn { address })
                    .await
                {
                    error!(%err, "Failed to send listening on event");
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(%peer_id, "Connection established");
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(%peer_id, ?cause, "Connection closed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(?peer_id, %error, "Outgoing connection error");
            }
            SwarmEvent::IncomingConnection { .. } | SwarmEvent::IncomingConnectionError { .. } => {}
            SwarmEvent::Dialing {
                peer_id: Some(peer_id),
                ..
            } => debug!(%peer_id, "Dialing peer"),
            unhandled => trace!(?unhandled, "Unhandled swarm event"),
        }
    }

    async fn handle_behaviour_event(&mut self, event: BehaviourEvent) {
        match event {
            BehaviourEvent::Identify(event) => events::EventHandler::handle(self, event).await,
            BehaviourEvent::Mdns(event) => events::EventHandler::handle(self, event).await,
            BehaviourEvent::Gossipsub(event) => events::EventHandler::handle(self, event).await,
            BehaviourEvent::Ping(event) => events::EventHandler::handle(self, event).await,
            BehaviourEvent::Stream(()) => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::ListenOn { addr, sender } => {
                let _ = match self.swarm.listen_on(addr) {
                    Ok(_) => sender.send(Ok(())),
                    Err(err) => sender.send(Err(eyre::eyre!(err))),
                };
            }
            Command::Dial { peer_addr, sender } => {
                let _ = match self.swarm.dial(peer_addr) {
                    Ok(()) => sender.send(Ok(())),
                    Err(err) => sender.send(Err(eyre::eyre!(err))),
                };
            }
            Command::Subscribe { topic, sender } => {
                let _ = match self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                    Ok(_) => sender.send(Ok(())),
                    Err(err) => sender.send(Err(eyre::eyre!(err))),
                };
            }
            Command::Publish {
                topic,
                data,
                sender,
            } => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(topic, data)
                    .map(|_message_id| ())
                    .map_err(|err| eyre::eyre!(err));

                let _ = sender.send(result);
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    ListenOn {
        addr: Multiaddr,
        sender: oneshot::Sender<eyre::Result<()>>,
    },
    Dial {
        peer_addr: Multiaddr,
        sender: oneshot::Sender<eyre::Result<()>>,
    },
    Subscribe {
        topic: gossipsub::IdentTopic,
        sender: oneshot::Sender<eyre::Result<()>>,
    },
    Publish {
        topic: gossipsub::TopicHash,
        data: Vec<u8>,
        sender: oneshot::Sender<eyre::Result<()>>,
    },
}
