//! Root-side packet handlers and the liveness sweep that prunes peers that
//! stop sending reunion traffic.

use std::time::{Duration, Instant};

use codec::{packet, Address, Packet, ReunionDirection, ReunionParser};
use graph::NetworkGraph;

use crate::transport::Stream;

/// How long a non-root node may go without a touched liveness timestamp
/// before its whole subtree is pruned.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RootState {
    graph: NetworkGraph,
}

impl RootState {
    pub fn new(address: Address) -> Self {
        Self {
            graph: NetworkGraph::new(address),
        }
    }

    pub fn handle_register(&mut self, stream: &mut Stream, self_address: Address, packet: &Packet) {
        if packet.body.starts_with(b"REQ") {
            match packet::parse_register_request(packet) {
                Ok(_requested) => {
                    // Registration is transport-level only: it never touches
                    // the graph, and repeating it is harmless (Open
                    // Question a).
                    let reply = Packet::register_response(self_address);
                    stream.add_message_to_out_buff(packet.source, true, reply.encode().to_vec());
                }
                Err(err) => log::warn!("dropping malformed register request from {}: {err}", packet.source),
            }
        } else if packet.body.starts_with(b"RES") {
            log::debug!("root dropping register response from {}", packet.source);
        } else {
            log::warn!("dropping unrecognized register packet from {}", packet.source);
        }
    }

    pub fn handle_advertise(&mut self, stream: &mut Stream, self_address: Address, packet: &Packet) {
        if packet.body.starts_with(b"REQ") {
            if let Err(err) = packet::parse_advertise_request(packet) {
                log::warn!("dropping malformed advertise request from {}: {err}", packet.source);
                return;
            }

            let sender = packet.source;
            let parent = self.graph.find_parent_for_new_node(&sender);

            if let Err(err) = self.graph.insert(sender, &parent) {
                log::warn!("failed to admit {sender} under {parent}: {err}");
                return;
            }

            log::info!("admitted {sender} under parent {parent}");

            let reply = Packet::advertise_response(self_address, &parent);
            stream.add_message_to_out_buff(sender, false, reply.encode().to_vec());
        } else if packet.body.starts_with(b"RES") {
            log::debug!("root dropping advertise response from {}", packet.source);
        } else {
            log::warn!("dropping unrecognized advertise packet from {}", packet.source);
        }
    }

    /// Roots do not accept children via Join; the log entry documents that a
    /// peer skipped straight to broadcasting without the root ever seeing it
    /// as an advertised child.
    pub fn handle_join(&self, packet: &Packet) {
        log::debug!("root ignoring join packet from {}", packet.source);
    }

    pub fn handle_reunion(&mut self, stream: &mut Stream, self_address: Address, packet: &Packet) {
        let (direction, entries) = match ReunionParser::parse(packet) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("dropping malformed reunion packet from {}: {err}", packet.source);
                return;
            }
        };

        match direction {
            ReunionDirection::Request => {
                // ReunionParser guarantees at least one entry.
                let last_hop = *entries.last().unwrap();
                if !stream.has_neighbor(last_hop) {
                    log::warn!("rejecting reunion request: {last_hop} is not a known neighbor");
                    return;
                }

                let now = Instant::now();
                for address in &entries {
                    self.graph.touch_last_seen(address, now);
                }

                let mut reversed = entries;
                reversed.reverse();

                match Packet::reunion_response(self_address, &reversed) {
                    Ok(reply) => stream.add_message_to_out_buff(last_hop, false, reply.encode().to_vec()),
                    Err(err) => log::warn!("failed to build reunion response: {err}"),
                }
            }
            ReunionDirection::Response => {
                log::debug!("root dropping reunion response from {}", packet.source);
            }
        }
    }

    /// Remove every node whose liveness timestamp has gone stale, along with
    /// its whole subtree, and drop the transport connections that served it.
    pub fn expire_inactive_nodes(&mut self, stream: &mut Stream) {
        let threshold = Instant::now() - LIVENESS_TIMEOUT;

        for address in self.graph.get_inactive_nodes(threshold) {
            if self.graph.remove(&address) {
                log::warn!("liveness expiry: removing {address} and its subtree");
                stream.remove_node(address);
            }
        }
    }
}
