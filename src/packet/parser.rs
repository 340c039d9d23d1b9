/// Packet parser module for analyzing network packets
///
/// Parses a captured frame down to the TCP segment: link header, IPv4/IPv6
/// header, then ports, options bytes, and payload. Anything that is not TCP
/// still parses (the classifier treats it as a no-op), anything truncated
/// is an error.

use crate::error::{FpError, FpResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{trace, warn};

/// Link-layer framing of a capture source
///
/// The kernel queue always delivers raw IP; offline sources declare their
/// link type in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Packet starts at the IP header
    RawIp,
    /// 14-byte Ethernet header
    Ethernet,
    /// 16-byte Linux cooked capture header
    LinuxSll,
    /// 4-byte BSD loopback family header
    Null,
}

impl LinkKind {
    /// Map a libpcap link-type number
    pub fn from_linktype(linktype: i32) -> FpResult<Self> {
        match linktype {
            0 => Ok(LinkKind::Null),
            1 => Ok(LinkKind::Ethernet),
            12 | 101 => Ok(LinkKind::RawIp),
            113 => Ok(LinkKind::LinuxSll),
            other => Err(FpError::malformed_packet(format!(
                "unsupported link type: {}",
                other
            ))),
        }
    }

    /// Offset of the IP header inside a frame of this link kind
    pub fn ip_offset(&self, data: &[u8]) -> FpResult<usize> {
        let offset = match self {
            LinkKind::RawIp => 0,
            LinkKind::Ethernet => {
                if data.len() < 14 {
                    return Err(FpError::malformed_packet("Ethernet frame too small"));
                }
                let ethertype = u16::from_be_bytes([data[12], data[13]]);
                if ethertype != 0x0800 && ethertype != 0x86DD {
                    return Err(FpError::malformed_packet(format!(
                        "non-IP ethertype: {:#06x}",
                        ethertype
                    )));
                }
                14
            }
            LinkKind::LinuxSll => 16,
            LinkKind::Null => 4,
        };

        if data.len() < offset {
            return Err(FpError::malformed_packet("frame shorter than link header"));
        }

        Ok(offset)
    }
}

/// Parsed packet information
#[derive(Debug, Clone)]
pub struct ParsedPacket {
    pub source_ip: IpAddr,
    pub dest_ip: IpAddr,
    pub protocol: u8,
    pub ttl: u8,
    /// Present only when the transport layer is TCP
    pub tcp: Option<ParsedTcpSegment>,
}

/// Parsed TCP segment
#[derive(Debug, Clone)]
pub struct ParsedTcpSegment {
    pub source_port: u16,
    pub dest_port: u16,
    pub data_offset: u8,
    /// Raw option bytes between the fixed header and the payload
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Packet parser
pub struct PacketParser {
    validate_checksums: bool,
}

impl PacketParser {
    /// Create a new packet parser
    ///
    /// # Arguments
    /// * `validate_checksums` - Whether to validate the IPv4 header checksum
    pub fn new(validate_checksums: bool) -> Self {
        Self { validate_checksums }
    }

    /// Parse a frame, stripping the link header first
    pub fn parse_frame(&self, data: &[u8], link: LinkKind) -> FpResult<ParsedPacket> {
        let offset = link.ip_offset(data)?;
        self.parse(&data[offset..])
    }

    /// Parse a raw IP packet
    ///
    /// The IP version is taken from the first nibble, so both the kernel
    /// queue path (always starts at IPv4) and offline raw-IP captures go
    /// through here unchanged.
    pub fn parse(&self, data: &[u8]) -> FpResult<ParsedPacket> {
        trace!("Parsing packet of {} bytes", data.len());

        if data.is_empty() {
            return Err(FpError::malformed_packet("empty packet"));
        }

        let version = (data[0] >> 4) & 0x0F;

        match version {
            4 => self.parse_ipv4(data),
            6 => self.parse_ipv6(data),
            _ => Err(FpError::malformed_packet(format!(
                "unknown IP version: {}",
                version
            ))),
        }
    }

    /// Parse an IPv4 packet
    fn parse_ipv4(&self, data: &[u8]) -> FpResult<ParsedPacket> {
        if data.len() < 20 {
            return Err(FpError::malformed_packet("IPv4 packet too small"));
        }

        let ihl = (data[0] & 0x0F) as usize * 4;
        if ihl < 20 || data.len() < ihl {
            return Err(FpError::malformed_packet("IPv4 header length out of range"));
        }

        let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let ttl = data[8];
        let protocol = data[9];
        let header_checksum = u16::from_be_bytes([data[10], data[11]]);

        let source_ip = IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15]));
        let dest_ip = IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19]));

        if self.validate_checksums {
            let calculated_checksum = Self::calculate_ip_checksum(&data[..ihl]);
            if calculated_checksum != 0 && calculated_checksum != header_checksum {
                warn!(
                    "IP checksum mismatch: expected {}, got {}",
                    header_checksum, calculated_checksum
                );
            }
        }

        trace!(
            "Parsed IPv4: {} -> {}, protocol={}, ttl={}",
            source_ip,
            dest_ip,
            protocol,
            ttl
        );

        // Trim link-layer padding: short Ethernet frames are padded past the
        // IP total length and the padding must not leak into the payload.
        let end = if total_len >= ihl && total_len <= data.len() {
            total_len
        } else {
            data.len()
        };

        let tcp = if protocol == 6 {
            Some(self.parse_tcp(&data[ihl..end])?)
        } else {
            None
        };

        Ok(ParsedPacket {
            source_ip,
            dest_ip,
            protocol,
            ttl,
            tcp,
        })
    }

    /// Parse an IPv6 packet
    ///
    /// Extension headers are not walked; a next-header other than TCP parses
    /// as a non-TCP packet.
    fn parse_ipv6(&self, data: &[u8]) -> FpResult<ParsedPacket> {
        if data.len() < 40 {
            return Err(FpError::malformed_packet("IPv6 packet too small"));
        }

        let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
        let next_header = data[6];
        let ttl = data[7]; // hop limit

        let mut src_bytes = [0u16; 8];
        let mut dst_bytes = [0u16; 8];

        for i in 0..8 {
            src_bytes[i] = u16::from_be_bytes([data[8 + i * 2], data[9 + i * 2]]);
            dst_bytes[i] = u16::from_be_bytes([data[24 + i * 2], data[25 + i * 2]]);
        }

        let source_ip = IpAddr::V6(Ipv6Addr::new(
            src_bytes[0], src_bytes[1], src_bytes[2], src_bytes[3],
            src_bytes[4], src_bytes[5], src_bytes[6], src_bytes[7],
        ));

        let dest_ip = IpAddr::V6(Ipv6Addr::new(
            dst_bytes[0], dst_bytes[1], dst_bytes[2], dst_bytes[3],
            dst_bytes[4], dst_bytes[5], dst_bytes[6], dst_bytes[7],
        ));

        trace!(
            "Parsed IPv6: {} -> {}, protocol={}, ttl={}",
            source_ip,
            dest_ip,
            next_header,
            ttl
        );

        let end = (40 + payload_len).min(data.len());

        let tcp = if next_header == 6 {
            Some(self.parse_tcp(&data[40..end])?)
        } else {
            None
        };

        Ok(ParsedPacket {
            source_ip,
            dest_ip,
            protocol: next_header,
            ttl,
            tcp,
        })
    }

    /// Parse a TCP segment into ports, options, and payload
    fn parse_tcp(&self, data: &[u8]) -> FpResult<ParsedTcpSegment> {
        if data.len() < 20 {
            return Err(FpError::malformed_packet("TCP segment too small"));
        }

        let source_port = u16::from_be_bytes([data[0], data[1]]);
        let dest_port = u16::from_be_bytes([data[2], data[3]]);
        let data_offset = (data[12] >> 4) & 0x0F;

        let header_len = data_offset as usize * 4;
        if header_len < 20 || data.len() < header_len {
            return Err(FpError::malformed_packet("TCP data offset out of range"));
        }

        let options = data[20..header_len].to_vec();
        let payload = data[header_len..].to_vec();

        trace!(
            "Parsed TCP: {} -> {}, {} option bytes, {} payload bytes",
            source_port,
            dest_port,
            options.len(),
            payload.len()
        );

        Ok(ParsedTcpSegment {
            source_port,
            dest_port,
            data_offset,
            options,
            payload,
        })
    }

    /// Calculate IP header checksum
    fn calculate_ip_checksum(data: &[u8]) -> u16 {
        let mut sum: u32 = 0;

        for chunk in data.chunks(2) {
            if chunk.len() == 2 {
                sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
            } else {
                sum += (chunk[0] as u32) << 8;
            }
        }

        while (sum >> 16) != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        !sum as u16
    }
}

impl Default for PacketParser {
    fn default() -> Self {
        Self::new(false)
    }
}
