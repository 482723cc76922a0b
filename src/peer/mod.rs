//! The tick loop shared by root and client peers, and packet/command
//! dispatch to whichever role-specific state machine is active.

pub mod client;
pub mod root;

pub use client::ClientState;
pub use root::RootState;

use std::time::{Duration, Instant};

use codec::{packet, Address, Packet, PacketKind};

use crate::buffers::CommandBuffer;
use crate::error::PeerError;
use crate::transport::Stream;

/// The interval between cooperative rounds of inbound drain, command
/// drain, outbound flush and reunion service.
const TICK_PERIOD: Duration = Duration::from_secs(2);

pub enum Role {
    Root(RootState),
    Client(ClientState),
}

/// A running peer: its own address, transport, command queue, and role.
/// The loop in [`Peer::run`] is the entire program once launched — there is
/// no other source of concurrency besides the producer threads feeding
/// `stream` and `commands`.
pub struct Peer {
    address: Address,
    stream: Stream,
    commands: CommandBuffer,
    alive: bool,
    role: Role,
}

impl Peer {
    pub fn new_root(address: Address, stream: Stream, commands: CommandBuffer) -> Self {
        Self {
            address,
            stream,
            commands,
            alive: true,
            role: Role::Root(RootState::new(address)),
        }
    }

    pub fn new_client(address: Address, root_address: Address, stream: Stream, commands: CommandBuffer) -> Self {
        Self {
            address,
            stream,
            commands,
            alive: true,
            role: Role::Client(ClientState::new(root_address)),
        }
    }

    /// Run the cooperative loop until the operator types `exit` or stdin
    /// closes. Each round does a fixed amount of work and then sleeps out
    /// the remainder of [`TICK_PERIOD`], so no phase can starve another.
    pub fn run(&mut self) {
        while self.alive {
            let started = Instant::now();
            self.tick();

            let elapsed = started.elapsed();
            if elapsed < TICK_PERIOD {
                std::thread::sleep(TICK_PERIOD - elapsed);
            }
        }

        self.stream.shutdown();
    }

    fn tick(&mut self) {
        for blob in self.stream.drain_inbound() {
            match Packet::decode(&blob) {
                Ok(packet) => self.dispatch_packet(packet),
                Err(err) => log::warn!("dropping malformed packet: {err}"),
            }
        }

        for tokens in self.commands.drain() {
            self.dispatch_command(tokens);
        }

        self.stream.send_out_buf_messages();

        match &mut self.role {
            Role::Root(root) => root.expire_inactive_nodes(&mut self.stream),
            Role::Client(client) if client.reunion_active() => {
                client.update_reunion(&mut self.stream, self.address);
            }
            Role::Client(_) => {}
        }
    }

    fn dispatch_packet(&mut self, packet: Packet) {
        match packet.kind {
            PacketKind::Register => match &mut self.role {
                Role::Root(root) => root.handle_register(&mut self.stream, self.address, &packet),
                Role::Client(client) => client.handle_register(&packet),
            },
            PacketKind::Advertise => match &mut self.role {
                Role::Root(root) => root.handle_advertise(&mut self.stream, self.address, &packet),
                Role::Client(client) => client.handle_advertise(&mut self.stream, self.address, &packet),
            },
            PacketKind::Join => match &mut self.role {
                Role::Root(root) => root.handle_join(&packet),
                Role::Client(client) => client.handle_join(&mut self.stream, &packet),
            },
            PacketKind::Message => {
                if let Err(err) = handle_message(&mut self.stream, self.address, &packet) {
                    log::warn!("{err}");
                }
            }
            PacketKind::Reunion => match &mut self.role {
                Role::Root(root) => root.handle_reunion(&mut self.stream, self.address, &packet),
                Role::Client(client) => client.handle_reunion(&mut self.stream, self.address, &packet),
            },
        }
    }

    fn dispatch_command(&mut self, tokens: Vec<String>) {
        let Some(command) = tokens.first() else {
            return;
        };

        match command.as_str() {
            "register" => match &mut self.role {
                Role::Client(client) => client.handle_command_register(&mut self.stream, self.address),
                Role::Root(_) => log::info!("root peers do not register"),
            },
            "advertiser" => match &mut self.role {
                Role::Client(client) => client.handle_command_advertiser(&mut self.stream, self.address),
                Role::Root(_) => log::info!("root peers do not advertise"),
            },
            "message" => {
                let Some(text) = tokens.get(1) else {
                    log::info!(r#"usage: message "<text>""#);
                    return;
                };
                let packet = Packet::message(self.address, text.clone());
                broadcast(&mut self.stream, &packet);
            }
            "exit" => self.alive = false,
            other => log::info!("unrecognized command: {other}"),
        }
    }
}

/// Rebroadcast a received Message to every neighbor except the one it came
/// from; print it locally first. Shared by root and client since broadcast
/// has no role-specific behavior (spec §4.6).
fn handle_message(stream: &mut Stream, self_address: Address, packet: &Packet) -> Result<(), PeerError> {
    let sender = packet.source;
    if !stream.has_neighbor(sender) {
        return Err(PeerError::UnknownNeighbor(sender));
    }

    let text = String::from_utf8_lossy(packet::parse_message(packet));
    println!("message from {sender}: {text}");

    let forward = Packet::message(self_address, packet.body.to_vec());
    let encoded = forward.encode().to_vec();
    for address in stream.neighbor_addresses() {
        if address != sender {
            stream.add_message_to_out_buff(address, false, encoded.clone());
        }
    }

    Ok(())
}

fn broadcast(stream: &mut Stream, packet: &Packet) {
    let encoded = packet.encode().to_vec();
    for address in stream.neighbor_addresses() {
        stream.add_message_to_out_buff(address, false, encoded.clone());
    }
}
