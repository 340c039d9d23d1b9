/// Display-line rendering
///
/// A matched packet prints as one flow header line plus a best-effort
/// rendering of its payload. Payloads that are mostly binary collapse to a
/// byte-count placeholder instead of a wall of dots.

use crate::fingerprint::Fingerprint;
use chrono::{TimeZone, Utc};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::net::IpAddr;

lazy_static! {
    static ref DOT_RUNS: Regex = Regex::new(r"\.+").unwrap();
    static ref SPACE_RUNS: Regex = Regex::new(r"\s+").unwrap();
}

/// Render a payload into a single display body
///
/// Non-printable bytes (outside 0x20-0x7E) are counted and replaced with
/// `.`. If at most half the bytes are non-printable, runs of dots collapse
/// to `...` and whitespace runs to a single space; otherwise the whole body
/// is replaced with a placeholder. Returns an empty string when display is
/// disabled.
pub fn render_body(payload: &[u8], display: bool) -> String {
    if !display {
        return String::new();
    }

    let mut body = payload.to_vec();
    let mut non_printable = 0usize;
    for byte in body.iter_mut() {
        if *byte < 0x20 || *byte > 0x7E {
            non_printable += 1;
            *byte = b'.';
        }
    }

    if non_printable > body.len() / 2 {
        return format!("... {} bytes of data ...", body.len());
    }

    let body = DOT_RUNS.replace_all(&body, &b"..."[..]);
    let body = SPACE_RUNS.replace_all(&body, &b" "[..]);

    // Only printable ASCII remains after the rewrite
    String::from_utf8_lossy(&body).into_owned()
}

/// Render the flow header line for a classified packet
pub fn render_line(
    src_ip: IpAddr,
    src_port: u16,
    dst_ip: IpAddr,
    dst_port: u16,
    fingerprint: &Fingerprint,
    reference_ts_ms: u64,
    body: &str,
) -> String {
    let timestamp = Utc
        .timestamp_millis_opt(reference_ts_ms as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{}ms", reference_ts_ms));

    format!(
        "{}:{} -> {}:{} ({}): {}\n {}",
        src_ip, src_port, dst_ip, dst_port, fingerprint, timestamp, body
    )
}
