//! Wire format for the tree-overlay peer protocol.
//!
//! A packet is a 20-byte fixed header (version, type, body length, source
//! address) followed by a position-based ASCII body whose shape depends on
//! the packet type. There are no delimiters inside a body: every field
//! starts at a fixed offset, and any body whose length does not match the
//! per-type formula is rejected rather than partially parsed.

pub mod address;
pub mod packet;

pub use address::Address;
pub use packet::{Packet, PacketKind, ReunionDirection, ReunionParser};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    MalformedPacket(&'static str),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPacket(reason) => write!(f, "malformed packet: {reason}"),
        }
    }
}
