/// Offline capture I/O
///
/// Thin wrappers over libpcap for the offline pipeline: a source that
/// iterates records of an existing capture (optionally BPF-filtered) and a
/// sink that writes matched packets back out as a raw-IP capture. `-` maps
/// to the standard streams.

use crate::error::{FpError, FpResult};
use crate::packet::LinkKind;
use pcap::{Capture, Linktype, Offline, Packet, PacketHeader, Savefile};

/// DLT_RAW: sink records start directly at the IP header
const LINKTYPE_RAW: i32 = 101;

/// One packet as read from the source
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub data: Vec<u8>,
    /// Capture timestamp in epoch milliseconds
    pub ts_ms: u64,
    pub link: LinkKind,
}

/// Offline packet source
pub struct PcapSource {
    capture: Capture<Offline>,
    link: LinkKind,
}

impl PcapSource {
    /// Open a capture file, `-` for stdin
    pub fn open(path: &str) -> FpResult<Self> {
        let real_path = if path == "-" { "/dev/stdin" } else { path };

        let capture = Capture::from_file(real_path)
            .map_err(|e| FpError::source_open(path, e.to_string()))?;
        let link = LinkKind::from_linktype(capture.get_datalink().0)
            .map_err(|e| FpError::source_open(path, e.to_string()))?;

        Ok(Self { capture, link })
    }

    /// Apply a BPF filter expression to the source
    pub fn apply_bpf(&mut self, expr: &str) -> FpResult<()> {
        self.capture
            .filter(expr, true)
            .map_err(|e| FpError::bad_bpf(expr, e.to_string()))
    }

    pub fn link(&self) -> LinkKind {
        self.link
    }

    /// Fetch the next record
    ///
    /// `None` is end-of-stream; a `Some(Err(..))` is a malformed record the
    /// caller may skip.
    pub fn next_record(&mut self) -> Option<FpResult<CaptureRecord>> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let ts_ms = ts.tv_sec as u64 * 1_000 + ts.tv_usec as u64 / 1_000;
                Some(Ok(CaptureRecord {
                    data: packet.data.to_vec(),
                    ts_ms,
                    link: self.link,
                }))
            }
            Err(pcap::Error::NoMorePackets) => None,
            Err(e) => Some(Err(FpError::malformed_packet(e.to_string()))),
        }
    }
}

/// Pcap sink writing raw-IP records with their original capture timestamps
pub struct PcapSink {
    savefile: Savefile,
}

impl PcapSink {
    /// Create a sink, `-` for stdout
    pub fn create(path: &str) -> FpResult<Self> {
        let real_path = if path == "-" { "/dev/stdout" } else { path };

        let dead = Capture::dead(Linktype(LINKTYPE_RAW))
            .map_err(|e| FpError::sink_open(path, e.to_string()))?;
        let savefile = dead
            .savefile(real_path)
            .map_err(|e| FpError::sink_open(path, e.to_string()))?;

        Ok(Self { savefile })
    }

    /// Append one record; `data` must start at the IP header
    pub fn write(&mut self, data: &[u8], ts_ms: u64) {
        let header = PacketHeader {
            ts: libc::timeval {
                tv_sec: (ts_ms / 1_000) as libc::time_t,
                tv_usec: ((ts_ms % 1_000) * 1_000) as libc::suseconds_t,
            },
            caplen: data.len() as u32,
            len: data.len() as u32,
        };
        self.savefile.write(&Packet::new(&header, data));
    }

    pub fn flush(&mut self) -> FpResult<()> {
        self.savefile
            .flush()
            .map_err(|e| FpError::sink_open("sink", e.to_string()))
    }
}
