/// Classification engine
///
/// The `Engine` owns every piece of shared classifier state: the allow and
/// deny sets, the collected-fingerprint list, the frequency map, the pcap
/// sink, and the compiled filters. Both pipelines hand it packets; the rule
/// chain decides whether a packet is of interest and what side effects to
/// emit. In verdict mode it additionally answers ACCEPT or DROP.

pub mod membership;
pub mod render;

pub use membership::{difference, dedup_symbols, SymbolSet};

use crate::capture::{CaptureRecord, PcapSink};
use crate::fingerprint::{self, Fingerprint};
use crate::packet::{PacketParser, ParsedPacket, ParsedTcpSegment};
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

lazy_static! {
    /// Flag traffic toward the protected host: 31 uppercase alphanumerics
    /// and a trailing `=`
    static ref FLAG_REGEX: Regex = Regex::new(r"[A-Z0-9]{31}=").unwrap();
}

/// Verdict returned to the kernel queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

/// Offline engine configuration
pub struct OfflineOptions {
    /// Only packets whose fingerprint is in this set pass (empty = all)
    pub match_set: Vec<String>,
    /// Packets whose fingerprint is in this set are skipped; overrides
    /// `match_set`
    pub unmatch_set: Vec<String>,
    pub payload_regex: Option<Regex>,
    pub sink: Option<PcapSink>,
    pub list_mode: bool,
    pub freq_mode: bool,
    /// Print a flow line per matching packet
    pub display_line: bool,
    /// Include the rendered payload on each flow line
    pub display_data: bool,
}

/// Real-time engine configuration
pub struct RealtimeOptions {
    pub denylist: Vec<String>,
    pub allowlist: Vec<String>,
    /// Destination the trust probe watches for flag traffic
    pub host: IpAddr,
    pub secret_regex: Option<Regex>,
}

struct SinkState {
    collected: Vec<Fingerprint>,
    sink: Option<PcapSink>,
}

/// Shared classifier state, tree-owned
pub struct Engine {
    parser: PacketParser,

    // Real-time gate
    verdict_mode: bool,
    host: Option<IpAddr>,
    secret_regex: Option<Regex>,
    denylist: Vec<String>,
    allowlist: SymbolSet,
    allowlist_origin: Vec<String>,

    // Offline filters
    match_set: Vec<String>,
    unmatch_set: Vec<String>,
    payload_regex: Option<Regex>,

    // Side effects
    list_mode: bool,
    freq_mode: bool,
    display_line: bool,
    display_data: bool,
    // Sink framing and collected-set insertion serialize together
    sink_state: Mutex<SinkState>,
    freq: RwLock<HashMap<String, AtomicU64>>,
}

impl Engine {
    /// Build an engine for the offline pipeline
    pub fn offline(opts: OfflineOptions) -> Self {
        Self {
            parser: PacketParser::default(),
            verdict_mode: false,
            host: None,
            secret_regex: None,
            denylist: Vec::new(),
            allowlist: SymbolSet::empty(),
            allowlist_origin: Vec::new(),
            match_set: dedup_symbols(opts.match_set),
            unmatch_set: dedup_symbols(opts.unmatch_set),
            payload_regex: opts.payload_regex,
            list_mode: opts.list_mode,
            freq_mode: opts.freq_mode,
            display_line: opts.display_line,
            display_data: opts.display_data,
            sink_state: Mutex::new(SinkState {
                collected: Vec::new(),
                sink: opts.sink,
            }),
            freq: RwLock::new(HashMap::new()),
        }
    }

    /// Build an engine for the real-time verdict pipeline
    pub fn realtime(opts: RealtimeOptions) -> Self {
        let allowlist_origin = dedup_symbols(opts.allowlist);
        Self {
            parser: PacketParser::default(),
            verdict_mode: true,
            host: Some(opts.host),
            secret_regex: opts.secret_regex,
            denylist: dedup_symbols(opts.denylist),
            allowlist: SymbolSet::new(allowlist_origin.clone()),
            allowlist_origin,
            match_set: Vec::new(),
            unmatch_set: Vec::new(),
            payload_regex: None,
            list_mode: false,
            freq_mode: false,
            display_line: true,
            display_data: true,
            sink_state: Mutex::new(SinkState {
                collected: Vec::new(),
                sink: None,
            }),
            freq: RwLock::new(HashMap::new()),
        }
    }

    /// Classify one offline record, emitting side effects only
    pub async fn classify_offline(&self, record: CaptureRecord) {
        let parsed = match self.parser.parse_frame(&record.data, record.link) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("skipping malformed packet: {}", e);
                return;
            }
        };

        let Some(tcp) = parsed.tcp.clone() else {
            return;
        };

        let fp = match fingerprint::derive(&parsed, record.ts_ms) {
            Ok(fp) => fp,
            Err(_) => return,
        };

        // Blacklist beats whitelist
        if !self.unmatch_set.is_empty() && self.unmatch_set.iter().any(|s| s == fp.name()) {
            return;
        }
        if !self.match_set.is_empty() && !self.match_set.iter().any(|s| s == fp.name()) {
            return;
        }

        if let Some(regex) = &self.payload_regex {
            if !regex.is_match(&tcp.payload) {
                return;
            }
        }

        self.record_observation(&record, &parsed, &tcp, &fp).await;
    }

    /// Classify one kernel-queue delivery and return a verdict
    ///
    /// The payload starts at the IPv4 header. Every skip condition maps to
    /// ACCEPT: a packet this engine cannot judge is let through.
    pub async fn classify_realtime(&self, payload: &[u8], reference_ts_ms: u64) -> Verdict {
        let parsed = match self.parser.parse(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("unparseable delivery: {}", e);
                return Verdict::Accept;
            }
        };

        let Some(tcp) = parsed.tcp.clone() else {
            return Verdict::Accept;
        };

        let fp = match fingerprint::derive(&parsed, reference_ts_ms) {
            Ok(fp) => fp,
            Err(_) => return Verdict::Accept,
        };

        // Trust probe first: a peer seen sending a flag or the secret must
        // be learned before the deny gate can drop it.
        let trusted = (self.host == Some(parsed.dest_ip) && FLAG_REGEX.is_match(&tcp.payload))
            || self
                .secret_regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(&tcp.payload));

        if trusted {
            warn!("flag or secret detected, learning fingerprint: {}", fp);
            self.allowlist.insert(fp.name()).await;
            self.display(&parsed, &tcp, &fp, reference_ts_ms);
            return Verdict::Accept;
        }

        // Allowlist overrides the denylist
        if !self.denylist.is_empty()
            && self.denylist.iter().any(|s| s == fp.name())
            && !self.allowlist.contains(fp.name()).await
        {
            return Verdict::Drop;
        }

        if let Some(regex) = &self.payload_regex {
            if !regex.is_match(&tcp.payload) {
                return Verdict::Accept;
            }
        }

        self.display(&parsed, &tcp, &fp, reference_ts_ms);
        Verdict::Accept
    }

    /// Step-7 side effects for a packet that passed every filter
    async fn record_observation(
        &self,
        record: &CaptureRecord,
        parsed: &ParsedPacket,
        tcp: &ParsedTcpSegment,
        fp: &Fingerprint,
    ) {
        {
            let mut state = self.sink_state.lock().await;

            if let Some(sink) = state.sink.as_mut() {
                // Sink records start at the IP header regardless of the
                // source link type.
                if let Ok(offset) = record.link.ip_offset(&record.data) {
                    sink.write(&record.data[offset..], record.ts_ms);
                }
            }

            if self.list_mode && !state.collected.iter().any(|c| c.delta() == fp.delta()) {
                state.collected.push(fp.clone());
            }
        }

        if self.freq_mode {
            self.bump_frequency(fp.name()).await;
        }

        if self.display_line {
            self.display(parsed, tcp, fp, record.ts_ms);
        }
    }

    /// Atomic frequency increment; the write lock is only taken for the
    /// first observation of a symbol
    async fn bump_frequency(&self, symbol: &str) {
        {
            let map = self.freq.read().await;
            if let Some(counter) = map.get(symbol) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut map = self.freq.write().await;
        map.entry(symbol.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn display(
        &self,
        parsed: &ParsedPacket,
        tcp: &ParsedTcpSegment,
        fp: &Fingerprint,
        reference_ts_ms: u64,
    ) {
        if !self.display_line {
            return;
        }

        let body = render::render_body(&tcp.payload, self.display_data);
        println!(
            "{}",
            render::render_line(
                parsed.source_ip,
                tcp.source_port,
                parsed.dest_ip,
                tcp.dest_port,
                fp,
                reference_ts_ms,
                &body,
            )
        );
    }

    /// Whether this engine answers verdicts
    pub fn verdict_mode(&self) -> bool {
        self.verdict_mode
    }

    pub fn list_mode(&self) -> bool {
        self.list_mode
    }

    pub fn freq_mode(&self) -> bool {
        self.freq_mode
    }

    /// Drain the collected fingerprints for the list summary
    pub async fn take_collected(&self) -> Vec<Fingerprint> {
        std::mem::take(&mut self.sink_state.lock().await.collected)
    }

    /// Snapshot the frequency map as (symbol, count) pairs
    pub async fn frequency_snapshot(&self) -> Vec<(String, u64)> {
        self.freq
            .read()
            .await
            .iter()
            .map(|(symbol, count)| (symbol.clone(), count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Flush the pcap sink, if one is attached
    pub async fn flush_sink(&self) -> crate::error::FpResult<()> {
        if let Some(sink) = self.sink_state.lock().await.sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    /// Current allowlist contents, deduplicated, in insertion order
    pub async fn allowlist_snapshot(&self) -> Vec<String> {
        self.allowlist.snapshot().await
    }

    /// The allowlist as configured at startup
    pub fn allowlist_origin(&self) -> &[String] {
        &self.allowlist_origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haiku;
    use crate::packet::parser::test_support::{build_tcp_packet, timestamp_option};
    use crate::packet::LinkKind;

    const HOST: [u8; 4] = [10, 60, 2, 1];

    fn flag_packet(ts_val: u32) -> Vec<u8> {
        build_tcp_packet(
            [10, 0, 0, 9],
            HOST,
            44123,
            1337,
            &timestamp_option(ts_val, 42),
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZ012345=",
        )
    }

    fn plain_packet(ts_val: u32, payload: &[u8]) -> Vec<u8> {
        build_tcp_packet(
            [10, 0, 0, 9],
            [10, 60, 2, 7],
            44123,
            1337,
            &timestamp_option(ts_val, 42),
            payload,
        )
    }

    fn record(data: Vec<u8>, ts_ms: u64) -> CaptureRecord {
        CaptureRecord {
            data,
            ts_ms,
            link: LinkKind::RawIp,
        }
    }

    fn realtime_engine(denylist: Vec<String>, allowlist: Vec<String>) -> Engine {
        Engine::realtime(RealtimeOptions {
            denylist,
            allowlist,
            host: HOST.into(),
            secret_regex: None,
        })
    }

    fn offline_defaults() -> OfflineOptions {
        OfflineOptions {
            match_set: Vec::new(),
            unmatch_set: Vec::new(),
            payload_regex: None,
            sink: None,
            list_mode: false,
            freq_mode: false,
            display_line: false,
            display_data: false,
        }
    }

    #[tokio::test]
    async fn test_non_tcp_is_accepted() {
        let engine = realtime_engine(vec![haiku::encode(2000)], Vec::new());
        let mut raw = plain_packet(1000, b"");
        raw[9] = 17; // UDP
        assert_eq!(engine.classify_realtime(&raw, 3000).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn test_denylisted_fingerprint_dropped() {
        // TSval 1000 at reference 2500 lands in the 2000 bucket
        let engine = realtime_engine(vec![haiku::encode(2000)], Vec::new());
        let raw = plain_packet(1000, b"hello");
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Drop);
    }

    #[tokio::test]
    async fn test_allowlist_overrides_denylist() {
        let engine = realtime_engine(vec![haiku::encode(2000)], vec![haiku::encode(2000)]);
        let raw = plain_packet(1000, b"hello");
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn test_trust_probe_beats_denylist_and_learns() {
        let symbol = haiku::encode(2000);
        let engine = realtime_engine(vec![symbol.clone()], Vec::new());

        let raw = flag_packet(1000);
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Accept);
        assert!(engine.allowlist.contains(&symbol).await);

        // The learned symbol now shields plain traffic from the same peer
        let raw = plain_packet(1000, b"hello");
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn test_flag_toward_other_host_is_not_trusted() {
        let symbol = haiku::encode(2000);
        let engine = realtime_engine(vec![symbol], Vec::new());

        // Same flag payload but the destination is not the protected host
        let raw = plain_packet(1000, b"ABCDEFGHIJKLMNOPQRSTUVWXYZ012345=");
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Drop);
    }

    #[tokio::test]
    async fn test_secret_regex_learns_any_destination() {
        let engine = Engine::realtime(RealtimeOptions {
            denylist: vec![haiku::encode(2000)],
            allowlist: Vec::new(),
            host: HOST.into(),
            secret_regex: Some(Regex::new("letmein").unwrap()),
        });

        let raw = plain_packet(1000, b"xx letmein xx");
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Accept);
        assert!(engine.allowlist.contains(&haiku::encode(2000)).await);
    }

    #[tokio::test]
    async fn test_missing_timestamp_accepted_without_learning() {
        let engine = realtime_engine(vec![haiku::encode(2000)], Vec::new());
        let raw = build_tcp_packet([10, 0, 0, 9], HOST, 1, 2, &[], b"hello");
        assert_eq!(engine.classify_realtime(&raw, 2500).await, Verdict::Accept);
        assert!(engine.allowlist.is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_list_mode_dedups_by_delta() {
        let engine = Engine::offline(OfflineOptions {
            list_mode: true,
            ..offline_defaults()
        });

        engine.classify_offline(record(plain_packet(1000, b"a"), 2500)).await;
        engine.classify_offline(record(plain_packet(1000, b"b"), 2500)).await;
        engine.classify_offline(record(plain_packet(1000, b"c"), 3500)).await;

        let collected = engine.take_collected().await;
        let deltas: Vec<u64> = collected.iter().map(|fp| fp.delta()).collect();
        assert_eq!(deltas, vec![2000, 3000]);
    }

    #[tokio::test]
    async fn test_offline_blacklist_beats_whitelist() {
        let symbol = haiku::encode(2000);
        let engine = Engine::offline(OfflineOptions {
            match_set: vec![symbol.clone()],
            unmatch_set: vec![symbol],
            list_mode: true,
            ..offline_defaults()
        });

        engine.classify_offline(record(plain_packet(1000, b"a"), 2500)).await;
        assert!(engine.take_collected().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_whitelist_filters() {
        let engine = Engine::offline(OfflineOptions {
            match_set: vec![haiku::encode(3000)],
            list_mode: true,
            ..offline_defaults()
        });

        engine.classify_offline(record(plain_packet(1000, b"a"), 2500)).await; // 2000
        engine.classify_offline(record(plain_packet(1000, b"b"), 3500)).await; // 3000

        let collected = engine.take_collected().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].delta(), 3000);
    }

    #[tokio::test]
    async fn test_payload_regex_filters_side_effects() {
        let engine = Engine::offline(OfflineOptions {
            payload_regex: Some(Regex::new("flag").unwrap()),
            freq_mode: true,
            ..offline_defaults()
        });

        engine.classify_offline(record(plain_packet(1000, b"flag{x}"), 2500)).await;
        engine.classify_offline(record(plain_packet(1000, b"nothing"), 2500)).await;

        let freq = engine.frequency_snapshot().await;
        assert_eq!(freq, vec![(haiku::encode(2000), 1)]);
    }

    #[tokio::test]
    async fn test_frequency_conservation() {
        let engine = Engine::offline(OfflineOptions {
            freq_mode: true,
            ..offline_defaults()
        });

        // deltas [2000, 2000, 3000]
        engine.classify_offline(record(plain_packet(1000, b"a"), 2500)).await;
        engine.classify_offline(record(plain_packet(1000, b"b"), 2500)).await;
        engine.classify_offline(record(plain_packet(1000, b"c"), 3500)).await;
        // and one packet that never reaches the side effects
        engine.classify_offline(record(build_tcp_packet([1, 1, 1, 1], [2, 2, 2, 2], 1, 2, &[], b""), 2500)).await;

        let mut freq = engine.frequency_snapshot().await;
        freq.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            freq,
            vec![(haiku::encode(3000), 1), (haiku::encode(2000), 2)]
        );
        assert_eq!(freq.iter().map(|(_, n)| n).sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn test_learned_symbols_reported_at_shutdown() {
        let engine = realtime_engine(Vec::new(), vec!["autumn".to_string()]);
        engine.classify_realtime(&flag_packet(1000), 2500).await;

        let current = engine.allowlist_snapshot().await;
        let learned = difference(&current, engine.allowlist_origin());
        assert_eq!(learned, vec![haiku::encode(2000)]);
    }
}
