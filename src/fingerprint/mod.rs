/// Fingerprint derivation from TCP timestamps
///
/// A peer's TCP Timestamps option (RFC 7323, kind 8) carries its own clock.
/// The difference between the observer's clock and that TSval, rounded up
/// to `PRECISION_MS`, is stable for a given peer regardless of NAT,
/// ephemeral ports, or source rewriting, and is what this module turns into
/// a named `Fingerprint`.

use crate::haiku;
use crate::packet::ParsedPacket;
use thiserror::Error;

/// Rounding granularity of the clock delta, in milliseconds
///
/// Fingerprints produced under a different precision are not comparable.
pub const PRECISION_MS: u64 = 1_000;

/// Per-packet soft failures
///
/// These are skip conditions, not errors worth logging on the hot path: a
/// packet without a usable timestamp simply produces no fingerprint.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeriveError {
    #[error("no TCP layer")]
    NoTcp,
    /// Covers missing option, truncated option, and TSecr == 0, which
    /// filters SYN-only half-handshakes that carry a TSval but no echo.
    #[error("no timestamp")]
    NoTimestamp,
    /// TSval ahead of the observer clock; the delta would underflow
    #[error("peer timestamp ahead of reference clock")]
    ClockSkewReverse,
}

/// A quantized clock-offset identity for a remote peer
///
/// Immutable once constructed; the symbolic name is computed eagerly from
/// the pure codec so copies can never disagree about it.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    delta: u64,
    name: String,
}

impl Fingerprint {
    /// Build a fingerprint from an already-rounded delta
    pub fn from_delta(delta: u64) -> Self {
        debug_assert_eq!(delta % PRECISION_MS, 0);
        Self {
            name: haiku::encode(delta),
            delta,
        }
    }

    /// The rounded clock delta in milliseconds
    pub fn delta(&self) -> u64 {
        self.delta
    }

    /// The haiku symbol naming this fingerprint
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        // Name equality is implied: the codec is bijective in delta
        self.delta == other.delta
    }
}

impl Eq for Fingerprint {}

impl std::hash::Hash for Fingerprint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.delta.hash(state);
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Derive a fingerprint from a parsed packet and a reference clock
///
/// The reference is the observer's view of the packet's arrival time in
/// epoch milliseconds: the capture timestamp offline, the queue-supplied
/// arrival time (or a wall-clock fallback) in-line.
pub fn derive(packet: &ParsedPacket, reference_ts_ms: u64) -> Result<Fingerprint, DeriveError> {
    let tcp = packet.tcp.as_ref().ok_or(DeriveError::NoTcp)?;
    let (ts_val, _ts_ecr) = extract_timestamps(&tcp.options)?;

    if ts_val > reference_ts_ms {
        return Err(DeriveError::ClockSkewReverse);
    }

    let delta = round_up(reference_ts_ms - ts_val, PRECISION_MS);
    Ok(Fingerprint::from_delta(delta))
}

/// Round `x` up to the next multiple of `n`
fn round_up(x: u64, n: u64) -> u64 {
    x.div_ceil(n) * n
}

/// Scan TCP option bytes for a well-formed Timestamps option
///
/// Returns (TSval, TSecr) as u64 with the 32-bit fields in the low bits.
/// A zero TSecr is rejected together with the missing-option case.
pub fn extract_timestamps(options: &[u8]) -> Result<(u64, u64), DeriveError> {
    let mut pos = 0;

    while pos < options.len() {
        match options[pos] {
            0 => break,     // end of option list
            1 => pos += 1,  // no-op padding
            kind => {
                if pos + 1 >= options.len() {
                    break;
                }
                let length = options[pos + 1] as usize;
                if length < 2 || pos + length > options.len() {
                    break;
                }

                if kind == 8 && length - 2 >= 8 {
                    let data = &options[pos + 2..pos + 10];
                    let ts_val = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
                    let ts_ecr = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as u64;

                    if ts_ecr == 0 {
                        return Err(DeriveError::NoTimestamp);
                    }

                    return Ok((ts_val, ts_ecr));
                }

                pos += length;
            }
        }
    }

    Err(DeriveError::NoTimestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parser::test_support::{build_tcp_packet, timestamp_option};
    use crate::packet::PacketParser;

    fn parse(packet: &[u8]) -> ParsedPacket {
        PacketParser::default().parse(packet).unwrap()
    }

    fn tcp_packet_with_timestamp(ts_val: u32, ts_ecr: u32) -> ParsedPacket {
        let opts = timestamp_option(ts_val, ts_ecr);
        parse(&build_tcp_packet(
            [10, 0, 0, 1],
            [10, 60, 2, 1],
            44123,
            80,
            &opts,
            b"",
        ))
    }

    #[test]
    fn test_extract_timestamps() {
        let opts = timestamp_option(0x12345678, 0x87654321);
        let (ts_val, ts_ecr) = extract_timestamps(&opts).unwrap();
        assert_eq!(ts_val, 0x12345678);
        assert_eq!(ts_ecr, 0x87654321);
    }

    #[test]
    fn test_zero_echo_rejected() {
        let opts = timestamp_option(1000, 0);
        assert_eq!(extract_timestamps(&opts), Err(DeriveError::NoTimestamp));
    }

    #[test]
    fn test_no_option_rejected() {
        // MSS only
        assert_eq!(
            extract_timestamps(&[2, 4, 0x05, 0xB4]),
            Err(DeriveError::NoTimestamp)
        );
        assert_eq!(extract_timestamps(&[]), Err(DeriveError::NoTimestamp));
    }

    #[test]
    fn test_truncated_option_rejected() {
        // kind 8 claiming 10 bytes with only 4 present
        assert_eq!(
            extract_timestamps(&[8, 10, 0, 0]),
            Err(DeriveError::NoTimestamp)
        );
    }

    #[test]
    fn test_derive_rounds_up() {
        // TSval 1000 observed at 2500 ms rounds up to a 2000 ms bucket
        let packet = tcp_packet_with_timestamp(1000, 42);
        let fp = derive(&packet, 2500).unwrap();
        assert_eq!(fp.delta(), 2000);
        assert_eq!(fp.name(), haiku::encode(2000));
    }

    #[test]
    fn test_derive_zero_delta() {
        let packet = tcp_packet_with_timestamp(1000, 42);
        let fp = derive(&packet, 1000).unwrap();
        assert_eq!(fp.delta(), 0);
        assert_eq!(fp.name(), haiku::encode(0));
    }

    #[test]
    fn test_derive_no_tcp() {
        let mut raw = build_tcp_packet([1, 1, 1, 1], [2, 2, 2, 2], 1, 2, &[], b"");
        raw[9] = 17;
        let packet = parse(&raw);
        assert_eq!(derive(&packet, 5000), Err(DeriveError::NoTcp));
    }

    #[test]
    fn test_derive_reverse_skew() {
        let packet = tcp_packet_with_timestamp(9000, 42);
        assert_eq!(derive(&packet, 5000), Err(DeriveError::ClockSkewReverse));
    }

    #[test]
    fn test_delta_always_multiple_of_precision() {
        for (ts_val, reference) in [(1u32, 1u64), (1, 2), (999, 5000), (123, 100_000)] {
            let packet = tcp_packet_with_timestamp(ts_val, 42);
            let fp = derive(&packet, reference).unwrap();
            assert_eq!(fp.delta() % PRECISION_MS, 0);
            assert!(fp.delta() >= reference - ts_val as u64);
        }
    }

    #[test]
    fn test_same_inputs_same_fingerprint() {
        let a = derive(&tcp_packet_with_timestamp(1000, 42), 2500).unwrap();
        let b = derive(&tcp_packet_with_timestamp(1000, 77), 2500).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_is_delta_equality() {
        assert_eq!(Fingerprint::from_delta(2000), Fingerprint::from_delta(2000));
        assert_ne!(Fingerprint::from_delta(2000), Fingerprint::from_delta(3000));
    }
}
