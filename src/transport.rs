//! Per-peer TCP transport: a listener that feeds a shared inbound buffer,
//! and a map of outbound per-neighbor connections with FIFO send buffers.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use codec::Address;

use crate::buffers::InboundBuffer;

/// A logical connection to a remote peer. `register` marks a
/// register-connection, used only for Register packets and excluded from
/// broadcasts. Created lazily on first outbound need; removed on explicit
/// removal or transport error.
pub struct Node {
    address: Address,
    register: bool,
    socket: TcpStream,
    out_buf: VecDeque<Vec<u8>>,
}

impl Node {
    fn connect(address: Address, register: bool) -> std::io::Result<Self> {
        let socket = TcpStream::connect(address.to_socket_addr())?;
        Ok(Self {
            address,
            register,
            socket,
            out_buf: VecDeque::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_register(&self) -> bool {
        self.register
    }

    pub fn add_message_to_out_buff(&mut self, bytes: Vec<u8>) {
        self.out_buf.push_back(bytes);
    }

    /// Drain this node's FIFO to its socket in enqueue order. A write error
    /// is reported to the caller, which removes the node; its loss is then
    /// discovered by the higher layer only via reunion timeout, per the
    /// transport's failure policy.
    fn send_out_buf(&mut self) -> std::io::Result<()> {
        while let Some(buf) = self.out_buf.pop_front() {
            self.socket.write_all(&buf)?;
        }

        Ok(())
    }
}

/// Owns the TCP listener and the map of outbound connections keyed by
/// (address, register flag) — the same remote peer may have both a
/// register-connection and an ordinary connection.
pub struct Stream {
    nodes: HashMap<(Address, bool), Node>,
    inbound: InboundBuffer,
    alive: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl Stream {
    /// Bind the peer's own canonical address and spawn the listener thread.
    pub fn bind(address: Address) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address.to_socket_addr())?;
        listener.set_nonblocking(true)?;

        let inbound = InboundBuffer::default();
        let alive = Arc::new(AtomicBool::new(true));

        let handle = {
            let inbound = inbound.clone();
            let alive = alive.clone();
            thread::spawn(move || run_listener(listener, inbound, alive))
        };

        Ok(Self {
            nodes: HashMap::new(),
            inbound,
            alive,
            listener: Some(handle),
        })
    }

    /// A `Stream` with no bound listener, for exercising the outbound side
    /// of peer state machines without an OS socket.
    #[cfg(test)]
    pub fn without_listener() -> Self {
        Self {
            nodes: HashMap::new(),
            inbound: InboundBuffer::default(),
            alive: Arc::new(AtomicBool::new(false)),
            listener: None,
        }
    }

    /// Drain every blob received since the last call, in FIFO order.
    pub fn drain_inbound(&self) -> Vec<Vec<u8>> {
        self.inbound.drain()
    }

    /// `true` if we hold an ordinary (non-register) connection to
    /// `address`. A register-connection alone does not make its owner a
    /// tree neighbor: it carries only Register packets and is excluded from
    /// broadcast and reunion traffic.
    pub fn has_neighbor(&self, address: Address) -> bool {
        self.nodes.contains_key(&(address, false))
    }

    /// Addresses of every non-register connection — the broadcast set.
    pub fn neighbor_addresses(&self) -> Vec<Address> {
        self.nodes
            .keys()
            .filter(|(_, register)| !register)
            .map(|(address, _)| *address)
            .collect()
    }

    pub fn get_or_create_node(&mut self, address: Address, register: bool) -> Option<&mut Node> {
        if !self.nodes.contains_key(&(address, register)) {
            match Node::connect(address, register) {
                Ok(node) => {
                    self.nodes.insert((address, register), node);
                }
                Err(err) => {
                    log::warn!("failed to connect to {address}: {err}");
                    return None;
                }
            }
        }

        self.nodes.get_mut(&(address, register))
    }

    /// Enqueue `bytes` for `address`. Silently dropped (best-effort, no
    /// retry) if a connection cannot be established.
    pub fn add_message_to_out_buff(&mut self, address: Address, register: bool, bytes: Vec<u8>) {
        if let Some(node) = self.get_or_create_node(address, register) {
            node.add_message_to_out_buff(bytes);
        }
    }

    /// Drain every connection's FIFO to its socket. No guaranteed
    /// inter-connection order; FIFO within each connection. A node whose
    /// send fails is closed and removed.
    pub fn send_out_buf_messages(&mut self) {
        let mut failed = Vec::new();

        for (key, node) in self.nodes.iter_mut() {
            if let Err(err) = node.send_out_buf() {
                log::warn!("closing connection to {}: {err}", node.address());
                failed.push(*key);
            }
        }

        for key in failed {
            self.nodes.remove(&key);
        }
    }

    pub fn remove_node(&mut self, address: Address) {
        self.nodes.remove(&(address, false));
        self.nodes.remove(&(address, true));
    }

    pub fn shutdown(&mut self) {
        self.alive.store(false, Ordering::Relaxed);

        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }

        self.nodes.clear();
    }
}

fn run_listener(listener: TcpListener, inbound: InboundBuffer, alive: Arc<AtomicBool>) {
    while alive.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((socket, peer)) => {
                log::debug!("accepted connection from {peer}");
                let inbound = inbound.clone();
                thread::spawn(move || handle_accepted(socket, inbound));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::warn!("accept failed: {err}");
            }
        }
    }
}

/// One-shot read of a single blob. The `ACK` reply is a transport-level
/// liveness acknowledgement only; it is never decoded as a packet.
fn handle_accepted(mut socket: TcpStream, inbound: InboundBuffer) {
    let mut buf = [0u8; 8192];

    match socket.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => {
            if let Err(err) = socket.write_all(b"ACK") {
                log::debug!("failed to ack inbound connection: {err}");
            }

            inbound.push(buf[..n].to_vec());
        }
        Err(err) => log::debug!("inbound read failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdTcpListener;

    fn addr_of(listener: &StdTcpListener) -> Address {
        Address::from_socket_addr(listener.local_addr().unwrap()).unwrap()
    }

    #[test]
    fn register_only_connection_does_not_count_as_a_neighbor() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let address = addr_of(&listener);
        let mut stream = Stream::without_listener();

        stream.get_or_create_node(address, true);
        assert!(!stream.has_neighbor(address));

        stream.get_or_create_node(address, false);
        assert!(stream.has_neighbor(address));
    }
}
