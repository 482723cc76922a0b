//! Client-side state machine: the Initial -> Registered -> Advertised ->
//! Joined ladder, its packet handlers, and the reunion daemon that detects
//! loss of the root.

use std::time::{Duration, Instant};

use codec::{packet, Address, Packet, ReunionDirection, ReunionParser};

use crate::transport::Stream;

/// How long without a reunion response before a client gives up on its
/// current parent and disconnects.
const REUNION_TIMEOUT: Duration = Duration::from_secs(45);
/// How often an unanswered reunion request is resent.
const REUNION_RESEND_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerStatus {
    Initial,
    Registered,
    Advertised,
    Joined,
}

pub struct ClientState {
    status: PeerStatus,
    root_address: Address,
    parent_address: Option<Address>,
    reunion_active: bool,
    reunion_sent: bool,
    last_reunion_request_sent: Option<Instant>,
    last_reunion_response_received: Option<Instant>,
}

impl ClientState {
    pub fn new(root_address: Address) -> Self {
        Self {
            status: PeerStatus::Initial,
            root_address,
            parent_address: None,
            reunion_active: false,
            reunion_sent: false,
            last_reunion_request_sent: None,
            last_reunion_response_received: None,
        }
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    pub fn reunion_active(&self) -> bool {
        self.reunion_active
    }

    pub fn handle_command_register(&mut self, stream: &mut Stream, self_address: Address) {
        if self.status != PeerStatus::Initial {
            log::info!("ignoring register command: already past the Initial state");
            return;
        }

        let request = Packet::register_request(self_address, &self_address);
        stream.add_message_to_out_buff(self.root_address, true, request.encode().to_vec());
    }

    pub fn handle_command_advertiser(&mut self, stream: &mut Stream, self_address: Address) {
        if self.status != PeerStatus::Registered && self.status != PeerStatus::Advertised {
            log::info!("ignoring advertiser command: status is {:?}", self.status);
            return;
        }

        let request = Packet::advertise_request(self_address);
        stream.add_message_to_out_buff(self.root_address, false, request.encode().to_vec());
    }

    pub fn handle_register(&mut self, packet: &Packet) {
        if packet.body.starts_with(b"RES") {
            if packet::parse_register_response(packet).is_err() {
                log::warn!("dropping malformed register response from {}", packet.source);
                return;
            }

            if self.status == PeerStatus::Initial {
                self.status = PeerStatus::Registered;
                log::info!("registered with root {}", packet.source);
            } else {
                log::debug!("dropping duplicate register response from {}", packet.source);
            }
        } else {
            log::debug!("client dropping register request from {}", packet.source);
        }
    }

    pub fn handle_advertise(&mut self, stream: &mut Stream, self_address: Address, packet: &Packet) {
        if !packet.body.starts_with(b"RES") {
            log::debug!("client dropping advertise request from {}", packet.source);
            return;
        }

        if self.status == PeerStatus::Joined {
            log::info!("ignoring advertise response: already joined");
            return;
        }

        let parent = match packet::parse_advertise_response(packet) {
            Ok(address) => address,
            Err(err) => {
                log::warn!("dropping malformed advertise response: {err}");
                return;
            }
        };

        self.parent_address = Some(parent);
        self.status = PeerStatus::Advertised;
        log::info!("advertised with parent {parent}");

        // No acknowledgement: Join is unconditional (Open Question c).
        let join = Packet::join(self_address);
        stream.add_message_to_out_buff(parent, false, join.encode().to_vec());
        self.status = PeerStatus::Joined;
        log::info!("joined parent {parent}");

        if !self.reunion_active {
            self.reunion_active = true;
            self.reunion_sent = false;
            self.last_reunion_response_received = Some(Instant::now());
            log::info!("reunion daemon started");
        }
    }

    pub fn handle_join(&self, stream: &mut Stream, packet: &Packet) {
        if packet::parse_join(packet).is_err() {
            log::warn!("dropping malformed join packet from {}", packet.source);
            return;
        }

        stream.get_or_create_node(packet.source, false);
        log::info!("{} joined as a child", packet.source);
    }

    pub fn handle_reunion(&mut self, stream: &mut Stream, self_address: Address, packet: &Packet) {
        let (direction, entries) = match ReunionParser::parse(packet) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("dropping malformed reunion packet: {err}");
                return;
            }
        };

        match direction {
            ReunionDirection::Request => self.handle_reunion_request(stream, self_address, packet.source, entries),
            ReunionDirection::Response => self.handle_reunion_response(stream, self_address, entries),
        }
    }

    fn handle_reunion_request(
        &self,
        stream: &mut Stream,
        self_address: Address,
        sender: Address,
        mut entries: Vec<Address>,
    ) {
        if !stream.has_neighbor(sender) {
            log::warn!("rejecting reunion request from non-neighbor {sender}");
            return;
        }

        let Some(parent) = self.parent_address else {
            log::warn!("dropping reunion request: no parent to forward to");
            return;
        };

        entries.push(self_address);
        match Packet::reunion_request(self_address, &entries) {
            Ok(forward) => stream.add_message_to_out_buff(parent, false, forward.encode().to_vec()),
            Err(err) => log::warn!("failed to forward reunion request: {err}"),
        }
    }

    fn handle_reunion_response(&mut self, stream: &mut Stream, self_address: Address, entries: Vec<Address>) {
        if entries.first() != Some(&self_address) {
            log::warn!("dropping reunion response: path does not start at self");
            return;
        }

        self.last_reunion_response_received = Some(Instant::now());
        self.reunion_sent = false;

        let rest = &entries[1..];
        let Some(&next_hop) = rest.first() else {
            // The response reached the node that originated the request.
            return;
        };

        if !stream.has_neighbor(next_hop) {
            log::warn!("dropping reunion response: {next_hop} is not a known child");
            return;
        }

        match Packet::reunion_response(self_address, rest) {
            Ok(forward) => stream.add_message_to_out_buff(next_hop, false, forward.encode().to_vec()),
            Err(err) => log::warn!("failed to forward reunion response: {err}"),
        }
    }

    /// Called once per tick while `reunion_active`: resend an unanswered
    /// request every [`REUNION_RESEND_INTERVAL`], and disconnect if no
    /// response has arrived within [`REUNION_TIMEOUT`].
    pub fn update_reunion(&mut self, stream: &mut Stream, self_address: Address) {
        let now = Instant::now();

        if let Some(last) = self.last_reunion_response_received {
            if now.duration_since(last) > REUNION_TIMEOUT {
                log::warn!("reunion timeout: disconnecting from root {}", self.root_address);
                self.disconnect(stream, self_address);
                return;
            }
        }

        if self.reunion_sent {
            return;
        }

        let should_send = match self.last_reunion_request_sent {
            None => true,
            Some(last) => now.duration_since(last) > REUNION_RESEND_INTERVAL,
        };

        if !should_send {
            return;
        }

        let Some(parent) = self.parent_address else {
            return;
        };

        match Packet::reunion_request(self_address, &[self_address]) {
            Ok(request) => {
                stream.add_message_to_out_buff(parent, false, request.encode().to_vec());
                self.reunion_sent = true;
                self.last_reunion_request_sent = Some(now);
            }
            Err(err) => log::warn!("failed to build reunion request: {err}"),
        }
    }

    /// Snap back to `Registered` and immediately re-advertise, per the
    /// disconnect policy: the client never falls all the way back to
    /// `Initial`, since it is already known to the root.
    fn disconnect(&mut self, stream: &mut Stream, self_address: Address) {
        self.status = PeerStatus::Registered;
        self.parent_address = None;
        self.reunion_active = false;
        self.reunion_sent = false;
        self.last_reunion_request_sent = None;
        self.last_reunion_response_received = None;

        let request = Packet::advertise_request(self_address);
        stream.add_message_to_out_buff(self.root_address, false, request.encode().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Address {
        Address::new([127, 0, 0, 1], port)
    }

    #[test]
    fn register_response_advances_from_initial_to_registered() {
        let root = addr(5356);
        let mut client = ClientState::new(root);

        client.handle_register(&Packet::register_response(root));
        assert_eq!(client.status(), PeerStatus::Registered);
    }

    #[test]
    fn duplicate_register_response_is_ignored() {
        let root = addr(5356);
        let mut client = ClientState::new(root);

        client.handle_register(&Packet::register_response(root));
        client.handle_register(&Packet::register_response(root));
        assert_eq!(client.status(), PeerStatus::Registered);
    }

    #[test]
    fn advertise_response_drives_straight_through_to_joined() {
        let root = addr(5356);
        let mut client = ClientState::new(root);
        let mut stream = Stream::without_listener();
        let self_address = addr(31315);

        client.handle_register(&Packet::register_response(root));
        client.handle_advertise(&mut stream, self_address, &Packet::advertise_response(root, &root));

        assert_eq!(client.status(), PeerStatus::Joined);
        assert!(client.reunion_active());
    }

    #[test]
    fn stray_advertise_response_is_ignored_once_already_joined() {
        let root = addr(5356);
        let mut client = ClientState::new(root);
        let mut stream = Stream::without_listener();
        let self_address = addr(31315);
        let other_parent = addr(31318);

        client.handle_register(&Packet::register_response(root));
        client.handle_advertise(&mut stream, self_address, &Packet::advertise_response(root, &root));
        assert_eq!(client.status(), PeerStatus::Joined);

        // A duplicate or stray response must not regress status back to
        // Advertised nor overwrite the already-recorded parent.
        client.handle_advertise(&mut stream, self_address, &Packet::advertise_response(root, &other_parent));

        assert_eq!(client.status(), PeerStatus::Joined);
        assert_eq!(client.parent_address, Some(root));
    }

    #[test]
    fn advertiser_command_is_rejected_before_registration() {
        let root = addr(5356);
        let mut client = ClientState::new(root);
        let mut stream = Stream::without_listener();

        client.handle_command_advertiser(&mut stream, addr(31315));
        assert_eq!(client.status(), PeerStatus::Initial);
    }

    #[test]
    fn reunion_timeout_snaps_back_to_registered_not_initial() {
        let root = addr(5356);
        let mut client = ClientState::new(root);
        let mut stream = Stream::without_listener();
        let self_address = addr(31315);

        client.handle_register(&Packet::register_response(root));
        client.handle_advertise(&mut stream, self_address, &Packet::advertise_response(root, &root));

        client.last_reunion_response_received = Some(Instant::now() - Duration::from_secs(60));
        client.update_reunion(&mut stream, self_address);

        assert_eq!(client.status(), PeerStatus::Registered);
        assert!(!client.reunion_active());
    }
}
