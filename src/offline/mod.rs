/// Offline analysis pipeline
///
/// Drives a finite pcap source through the classifier: packets are pulled
/// in capture order, classified concurrently under a fixed bound, and the
/// requested summaries are emitted once the source is exhausted or the user
/// interrupts. An interrupt drains in-flight work instead of discarding it,
/// so summaries still reflect everything classified.

use crate::capture::PcapSource;
use crate::engine::Engine;
use crate::error::FpResult;
use crate::fingerprint::Fingerprint;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Offline driver knobs not owned by the engine
pub struct OfflineSettings {
    /// Emit the progress line every `progress_interval` packets
    pub progress: bool,
    pub progress_interval: u64,
    /// Bound on concurrently classified packets
    pub max_concurrent: usize,
}

/// Run the offline pipeline to completion
pub async fn run(
    engine: Arc<Engine>,
    mut source: PcapSource,
    settings: &OfflineSettings,
) -> FpResult<()> {
    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, draining in-flight packets");
                cancelled.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut progress = Progress::new(settings.progress, settings.progress_interval);
    let mut packet_count = 0u64;

    let records = std::iter::from_fn(|| loop {
        if cancelled.load(Ordering::Relaxed) {
            return None;
        }
        match source.next_record() {
            None => return None,
            Some(Ok(record)) => {
                packet_count += 1;
                progress.tick();
                return Some(record);
            }
            Some(Err(e)) => {
                debug!("malformed packet skipped: {}", e);
                continue;
            }
        }
    });

    // Delivery stays in capture order; completion order does not matter and
    // the bound keeps memory flat on large captures.
    let engine_ref = engine.as_ref();
    stream::iter(records)
        .map(|record| engine_ref.classify_offline(record))
        .buffer_unordered(settings.max_concurrent.max(1))
        .for_each(|_| async {})
        .await;

    info!("source exhausted after {} packets", packet_count);

    engine.flush_sink().await?;

    if engine.list_mode() {
        emit_list(&engine).await;
    }

    if engine.freq_mode() {
        emit_frequency(&engine).await;
    }

    Ok(())
}

/// Collected fingerprints sorted by name for the list summary
fn sorted_symbols(mut collected: Vec<Fingerprint>) -> Vec<String> {
    collected.sort_by(|a, b| a.name().cmp(b.name()));
    collected.into_iter().map(|fp| fp.name().to_string()).collect()
}

/// Frequency pairs in ascending count order, names breaking ties
fn sorted_frequency(mut freq: Vec<(String, u64)>) -> Vec<(String, u64)> {
    freq.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    freq
}

async fn emit_list(engine: &Engine) {
    let symbols = sorted_symbols(engine.take_collected().await);
    eprintln!("Collected {} fingerprints", symbols.len());
    eprintln!("{}", symbols.join(","));
}

async fn emit_frequency(engine: &Engine) {
    let freq = sorted_frequency(engine.frequency_snapshot().await);
    for (symbol, count) in &freq {
        println!("{}: {}", symbol, count);
    }
    let symbols: Vec<&str> = freq.iter().map(|(symbol, _)| symbol.as_str()).collect();
    println!("{}", symbols.join(","));
}

/// Stderr progress line, rewritten in place every interval
struct Progress {
    enabled: bool,
    every: u64,
    count: u64,
    started: Instant,
}

impl Progress {
    fn new(enabled: bool, every: u64) -> Self {
        Self {
            enabled,
            every: every.max(1),
            count: 0,
            started: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.count += 1;
        if !self.enabled || self.count % self.every != 0 {
            return;
        }

        if self.count > self.every {
            // Rewrite the previous progress line
            eprint!("\x1b[1A\x1b[K");
        }

        let kpkt_per_sec =
            self.count as f64 / self.started.elapsed().as_secs_f64().max(f64::EPSILON) / 1_000.0;
        eprintln!(
            "clockprint: processed {}K packets ({:.0} Kpkt/s)",
            self.count / 1_000,
            kpkt_per_sec
        );
    }
}
