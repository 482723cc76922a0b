use std::fmt;

use codec::Address;

/// Errors surfaced by the peer's own state machines. Transport errors are
/// not modeled here: a failed send closes and removes its `Node` directly
/// in `Stream::send_out_buf_messages` and is logged there, per the
/// transport's failure policy (the higher-level state machine only learns
/// of the loss later, via reunion timeout).
#[derive(Debug)]
pub enum PeerError {
    UnknownNeighbor(Address),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNeighbor(address) => write!(f, "packet from unknown neighbor {address}"),
        }
    }
}

impl std::error::Error for PeerError {}
