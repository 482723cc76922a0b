use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::address::{Address, ADDRESS_WIDTH};
use crate::Error;

/// Every packet carries this version; there is no negotiation.
pub const VERSION: u16 = 1;
/// Fixed header size: version(2) + type(2) + length(4) + source ip(8) +
/// source port(4).
pub const HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Register = 1,
    Advertise = 2,
    Join = 3,
    Message = 4,
    Reunion = 5,
}

impl TryFrom<u16> for PacketKind {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Error> {
        Ok(match value {
            1 => Self::Register,
            2 => Self::Advertise,
            3 => Self::Join,
            4 => Self::Message,
            5 => Self::Reunion,
            _ => return Err(Error::MalformedPacket("unknown packet type")),
        })
    }
}

/// Direction tag carried by the first 3 bytes of a Register, Advertise or
/// Reunion body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReunionDirection {
    Request,
    Response,
}

impl ReunionDirection {
    fn tag(self) -> &'static str {
        match self {
            Self::Request => "REQ",
            Self::Response => "RES",
        }
    }
}

/// A decoded or about-to-be-encoded packet. The body is kept as raw bytes;
/// per-type structure is extracted on demand by the `parse_*` functions and
/// `ReunionParser` below, mirroring how the handlers dispatch on `kind`
/// before deciding how to read the body.
#[derive(Debug, Clone)]
pub struct Packet {
    pub version: u16,
    pub kind: PacketKind,
    pub source: Address,
    pub body: Bytes,
}

impl Packet {
    fn new(source: Address, kind: PacketKind, body: Vec<u8>) -> Self {
        Self {
            version: VERSION,
            kind,
            source,
            body: Bytes::from(body),
        }
    }

    pub fn register_request(source: Address, requested: &Address) -> Self {
        let body = format!("REQ{}", requested.to_canonical());
        Self::new(source, PacketKind::Register, body.into_bytes())
    }

    pub fn register_response(source: Address) -> Self {
        Self::new(source, PacketKind::Register, b"RESACK".to_vec())
    }

    pub fn advertise_request(source: Address) -> Self {
        Self::new(source, PacketKind::Advertise, b"REQ".to_vec())
    }

    pub fn advertise_response(source: Address, parent: &Address) -> Self {
        let body = format!("RES{}", parent.to_canonical());
        Self::new(source, PacketKind::Advertise, body.into_bytes())
    }

    pub fn join(source: Address) -> Self {
        Self::new(source, PacketKind::Join, b"JOIN".to_vec())
    }

    pub fn message(source: Address, text: impl Into<Vec<u8>>) -> Self {
        Self::new(source, PacketKind::Message, text.into())
    }

    pub fn reunion_request(source: Address, entries: &[Address]) -> Result<Self, Error> {
        Self::reunion(source, ReunionDirection::Request, entries)
    }

    pub fn reunion_response(source: Address, entries: &[Address]) -> Result<Self, Error> {
        Self::reunion(source, ReunionDirection::Response, entries)
    }

    fn reunion(source: Address, dir: ReunionDirection, entries: &[Address]) -> Result<Self, Error> {
        if entries.is_empty() || entries.len() > 99 {
            return Err(Error::MalformedPacket("reunion entry count out of range"));
        }

        let mut body = format!("{}{:02}", dir.tag(), entries.len());
        for entry in entries {
            body.push_str(&entry.to_canonical());
        }

        Ok(Self::new(source, PacketKind::Reunion, body.into_bytes()))
    }

    /// Encode to the wire format: 20-byte header followed by the body.
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.body.len());

        out.put_u16(self.version);
        out.put_u16(self.kind as u16);
        out.put_u32(self.body.len() as u32);

        for octet in self.source.octets() {
            out.put_u16(octet as u16);
        }

        out.put_u32(self.source.port() as u32);
        out.extend_from_slice(&self.body);

        out
    }

    /// Decode a packet from a complete buffer. Fails if the buffer is
    /// shorter than the header or the header's length field disagrees with
    /// the actual body size.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::MalformedPacket("buffer shorter than header"));
        }

        let mut header = &buf[..HEADER_LEN];
        let version = header.get_u16();
        let kind_raw = header.get_u16();
        let length = header.get_u32() as usize;

        let mut octets = [0u8; 4];
        for octet in octets.iter_mut() {
            *octet = header.get_u16() as u8;
        }

        let port = header.get_u32();
        if port > u16::MAX as u32 {
            return Err(Error::MalformedPacket("source port out of range"));
        }

        let body = &buf[HEADER_LEN..];
        if body.len() != length {
            return Err(Error::MalformedPacket("length header does not match body"));
        }

        Ok(Self {
            version,
            kind: PacketKind::try_from(kind_raw)?,
            source: Address::new(octets, port as u16),
            body: Bytes::copy_from_slice(body),
        })
    }
}

fn ascii_body(packet: &Packet) -> Result<&str, Error> {
    let text =
        std::str::from_utf8(&packet.body).map_err(|_| Error::MalformedPacket("body is not valid utf8"))?;

    if !text.is_ascii() {
        return Err(Error::MalformedPacket("body is not ascii"));
    }

    Ok(text)
}

/// Parse a Register Request body (`"REQ" + ip(15) + port(5)`), returning
/// the address the sender wants registered.
pub fn parse_register_request(packet: &Packet) -> Result<Address, Error> {
    let body = ascii_body(packet)?;
    if body.len() != 3 + ADDRESS_WIDTH || &body[..3] != "REQ" {
        return Err(Error::MalformedPacket("bad register request body"));
    }

    Address::parse_canonical(&body[3..])
}

/// Validate a Register Response body (`"RESACK"`).
pub fn parse_register_response(packet: &Packet) -> Result<(), Error> {
    let body = ascii_body(packet)?;
    if body != "RESACK" {
        return Err(Error::MalformedPacket("bad register response body"));
    }

    Ok(())
}

/// Validate an Advertise Request body (`"REQ"`).
pub fn parse_advertise_request(packet: &Packet) -> Result<(), Error> {
    let body = ascii_body(packet)?;
    if body != "REQ" {
        return Err(Error::MalformedPacket("bad advertise request body"));
    }

    Ok(())
}

/// Parse an Advertise Response body (`"RES" + ip(15) + port(5)`), returning
/// the assigned parent's address.
pub fn parse_advertise_response(packet: &Packet) -> Result<Address, Error> {
    let body = ascii_body(packet)?;
    if body.len() != 3 + ADDRESS_WIDTH || &body[..3] != "RES" {
        return Err(Error::MalformedPacket("bad advertise response body"));
    }

    Address::parse_canonical(&body[3..])
}

/// Validate a Join body (`"JOIN"`).
pub fn parse_join(packet: &Packet) -> Result<(), Error> {
    let body = ascii_body(packet)?;
    if body != "JOIN" {
        return Err(Error::MalformedPacket("bad join body"));
    }

    Ok(())
}

/// A Message body is arbitrary text; its length is the packet length.
pub fn parse_message(packet: &Packet) -> &[u8] {
    &packet.body
}

/// Validates and parses a Reunion body:
/// `"REQ"|"RES" + count(2) + count * (ip(15) + port(5))`.
///
/// A body of exactly 5 bytes (a direction tag plus a `00` count) is
/// rejected: a Reunion packet always carries at least one entry.
pub struct ReunionParser;

impl ReunionParser {
    pub fn parse(packet: &Packet) -> Result<(ReunionDirection, Vec<Address>), Error> {
        let body = ascii_body(packet)?;

        if body.len() <= 5 {
            return Err(Error::MalformedPacket("reunion body too short"));
        }

        if (body.len() - 5) % ADDRESS_WIDTH != 0 {
            return Err(Error::MalformedPacket("reunion body length not aligned"));
        }

        let dir = match &body[..3] {
            "REQ" => ReunionDirection::Request,
            "RES" => ReunionDirection::Response,
            _ => return Err(Error::MalformedPacket("bad reunion direction")),
        };

        let count: usize = body[3..5]
            .parse()
            .map_err(|_| Error::MalformedPacket("reunion count is not decimal"))?;

        if body.len() != 5 + ADDRESS_WIDTH * count {
            return Err(Error::MalformedPacket("reunion count does not match body"));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let start = 5 + ADDRESS_WIDTH * i;
            entries.push(Address::parse_canonical(&body[start..start + ADDRESS_WIDTH])?);
        }

        Ok((dir, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> Address {
        Address::new([a, b, c, d], port)
    }

    #[test]
    fn register_request_round_trip() {
        let source = addr(127, 0, 0, 1, 31315);
        let packet = Packet::register_request(source, &source);
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes).unwrap();

        assert_eq!(decoded.kind, PacketKind::Register);
        assert_eq!(decoded.source, source);
        assert_eq!(parse_register_request(&decoded).unwrap(), source);
    }

    #[test]
    fn register_response_body_is_resack() {
        let source = addr(127, 0, 0, 1, 5356);
        let packet = Packet::register_response(source);
        assert_eq!(&packet.body[..], b"RESACK");
        assert!(parse_register_response(&packet).is_ok());
    }

    #[test]
    fn advertise_round_trip() {
        let client = addr(127, 0, 0, 1, 31315);
        let root = addr(127, 0, 0, 1, 5356);

        let request = Packet::advertise_request(client);
        assert_eq!(&request.body[..], b"REQ");
        assert!(parse_advertise_request(&request).is_ok());

        let response = Packet::advertise_response(root, &root);
        let decoded = Packet::decode(&response.encode()).unwrap();
        assert_eq!(parse_advertise_response(&decoded).unwrap(), root);
    }

    #[test]
    fn join_body_is_fixed() {
        let packet = Packet::join(addr(127, 0, 0, 1, 31315));
        assert_eq!(&packet.body[..], b"JOIN");
        assert!(parse_join(&packet).is_ok());
    }

    #[test]
    fn message_body_carries_arbitrary_text() {
        let source = addr(127, 0, 0, 1, 31315);
        let packet = Packet::message(source, "Hello World!");
        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(parse_message(&decoded), b"Hello World!");
    }

    #[test]
    fn reunion_request_literal_example() {
        let a = addr(127, 0, 0, 1, 31315);
        let root = addr(127, 0, 0, 1, 5356);
        let packet = Packet::reunion_request(a, &[a]).unwrap();

        assert_eq!(&packet.body[..], b"REQ01127.000.000.00131315");

        let decoded = Packet::decode(&packet.encode()).unwrap();
        let (dir, entries) = ReunionParser::parse(&decoded).unwrap();
        assert_eq!(dir, ReunionDirection::Request);
        assert_eq!(entries, vec![a]);

        let _ = root; // documents the intended destination of this literal example
    }

    #[test]
    fn reunion_response_reverses_path() {
        let a = addr(127, 0, 0, 1, 31315);
        let b = addr(127, 0, 0, 1, 31318);
        let r = addr(127, 0, 0, 1, 5356);

        let request = Packet::reunion_request(r, &[b, a]).unwrap();
        assert_eq!(
            &request.body[..],
            b"REQ02127.000.000.00131318127.000.000.00131315"
        );

        let response = Packet::reunion_response(r, &[a, b]).unwrap();
        assert_eq!(
            &response.body[..],
            b"RES02127.000.000.00131315127.000.000.00131318"
        );
    }

    #[test]
    fn reunion_rejects_zero_entries() {
        assert!(Packet::reunion_request(addr(127, 0, 0, 1, 1), &[]).is_err());
    }

    #[test]
    fn reunion_rejects_misaligned_body() {
        let source = addr(127, 0, 0, 1, 31315);
        let mut packet = Packet::reunion_request(source, &[source]).unwrap();
        packet.body = Bytes::from_static(b"REQ01truncated");
        assert!(ReunionParser::parse(&packet).is_err());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(Packet::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let source = addr(127, 0, 0, 1, 31315);
        let mut bytes = Packet::join(source).encode();
        bytes.truncate(bytes.len() - 1);
        assert!(Packet::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let source = addr(127, 0, 0, 1, 31315);
        let mut bytes = Packet::join(source).encode();
        bytes[3] = 9;
        assert!(Packet::decode(&bytes).is_err());
    }
}
