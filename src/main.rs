/// clockprint - TCP timestamp fingerprinting CLI
///
/// Main entry point for the command-line interface

use clap::{Parser, Subcommand};
use clockprint::capture::{PcapSink, PcapSource};
use clockprint::engine::{Engine, OfflineOptions, RealtimeOptions};
use clockprint::realtime::NfPacketQueue;
use clockprint::{compile_payload_regex, init_library, parse_symbol_list, FpError, FpResult};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "clockprint")]
#[command(version = clockprint::VERSION)]
#[command(about = "TCP timestamp clock-skew fingerprinting and filtering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (default: config.toml if present)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an existing capture
    Offline {
        /// Input pcap path, `-` for stdin
        input: String,

        /// BPF filter expression applied by the source
        #[arg(long)]
        bpf: Option<String>,

        /// Payload byte-regex; only matching packets are reported
        #[arg(short = 'r', long = "regex")]
        regex: Option<String>,

        /// Comma-separated fingerprints to keep (whitelist)
        #[arg(long)]
        white: Option<String>,

        /// Comma-separated fingerprints to skip (overrides --white)
        #[arg(long)]
        black: Option<String>,

        /// Write matching packets to this pcap, `-` for stdout
        #[arg(short = 'o', long = "out")]
        out: Option<String>,

        /// List collected fingerprints instead of per-packet lines
        #[arg(short = 'L', long = "list")]
        list: bool,

        /// Print a per-fingerprint frequency histogram
        #[arg(short = 'F', long = "freq")]
        freq: bool,

        /// Emit progress to stderr every 10000 packets
        #[arg(short = 'p', long = "progress")]
        progress: bool,

        /// Include the rendered payload on each line
        #[arg(long = "data")]
        data: bool,
    },

    /// Filter live traffic delivered by a netfilter queue
    Realtime {
        /// Kernel queue number
        #[arg(long)]
        queue: Option<u16>,

        /// Comma-separated fingerprints to drop (denylist)
        #[arg(long)]
        black: Option<String>,

        /// Initial allowlist; overrides the denylist
        #[arg(long)]
        white: Option<String>,

        /// Destination IP watched for flag traffic
        #[arg(long)]
        host: Option<String>,

        /// Payload regex that also learns trusted fingerprints
        #[arg(long)]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (config, _guard) = match init_library(cli.config.as_deref(), cli.verbose).await {
        Ok(result) => result,
        Err(e) => clockprint::logging::log_fatal_error("failed to initialize: ", &e),
    };

    let result = match cli.command {
        Commands::Offline {
            input,
            bpf,
            regex,
            white,
            black,
            out,
            list,
            freq,
            progress,
            data,
        } => {
            handle_offline(
                &config, input, bpf, regex, white, black, out, list, freq, progress, data,
            )
            .await
        }
        Commands::Realtime {
            queue,
            black,
            white,
            host,
            secret,
        } => handle_realtime(&config, queue, black, white, host, secret).await,
    };

    if let Err(e) = result {
        clockprint::logging::log_fatal_error("", &e);
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_offline(
    config: &clockprint::AppConfig,
    input: String,
    bpf: Option<String>,
    regex: Option<String>,
    white: Option<String>,
    black: Option<String>,
    out: Option<String>,
    list: bool,
    freq: bool,
    progress: bool,
    data: bool,
) -> FpResult<()> {
    let match_set = parse_symbol_list(white.as_deref().unwrap_or(""))?;
    let unmatch_set = parse_symbol_list(black.as_deref().unwrap_or(""))?;

    let payload_regex = regex.as_deref().map(compile_payload_regex).transpose()?;

    let sink = out.as_deref().map(PcapSink::create).transpose()?;

    let mut source = PcapSource::open(&input)?;
    if let Some(expr) = bpf.as_deref() {
        source.apply_bpf(expr)?;
    }

    let engine = Arc::new(Engine::offline(OfflineOptions {
        match_set,
        unmatch_set,
        payload_regex,
        sink,
        list_mode: list,
        freq_mode: freq,
        display_line: !list && !freq,
        display_data: data,
    }));

    info!("starting offline analysis of {}", input);

    clockprint::offline::run(
        engine,
        source,
        &clockprint::offline::OfflineSettings {
            progress,
            progress_interval: config.engine.progress_interval,
            max_concurrent: config.engine.max_concurrent_tasks,
        },
    )
    .await
}

async fn handle_realtime(
    config: &clockprint::AppConfig,
    queue: Option<u16>,
    black: Option<String>,
    white: Option<String>,
    host: Option<String>,
    secret: Option<String>,
) -> FpResult<()> {
    let denylist = parse_symbol_list(black.as_deref().unwrap_or(""))?;
    let allowlist = parse_symbol_list(white.as_deref().unwrap_or(""))?;

    let host_str = host.unwrap_or_else(|| config.engine.host.clone());
    let host: IpAddr = host_str
        .parse()
        .map_err(|_| FpError::validation("host", format!("could not parse IP: {}", host_str)))?;

    let secret_regex = secret.as_deref().map(compile_payload_regex).transpose()?;

    let engine = Arc::new(Engine::realtime(RealtimeOptions {
        denylist,
        allowlist,
        host,
        secret_regex,
    }));

    let settings = clockprint::QueueSettings::from_config(&config.queue, queue);
    let mut nfqueue = NfPacketQueue::open(&settings)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, closing queue");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    clockprint::realtime::run(engine, &mut nfqueue, &settings, shutdown).await
}
