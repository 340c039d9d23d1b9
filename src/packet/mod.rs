/// Packet parsing module
///
/// Turns raw capture bytes into the packet context the classifier consumes:
/// addresses, ports, TCP options, and TCP payload.

pub mod parser;

pub use parser::{LinkKind, PacketParser, ParsedPacket, ParsedTcpSegment};
