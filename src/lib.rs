/// clockprint - TCP timestamp fingerprinting library
///
/// Fingerprints TCP endpoints by the quantized offset between the
/// observer's clock and the peer-supplied TSval (RFC 7323), names each
/// offset bucket with a bijective word encoding, and matches those names
/// against allow/deny sets both offline and in-line on a netfilter queue.

// Module declarations
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod haiku;
pub mod logging;
pub mod offline;
pub mod packet;
pub mod realtime;

// Re-export commonly used types
pub use config::AppConfig;
pub use engine::{Engine, OfflineOptions, RealtimeOptions, SymbolSet, Verdict};
pub use error::{FpError, FpResult};
pub use fingerprint::{Fingerprint, PRECISION_MS};
pub use packet::{PacketParser, ParsedPacket};
pub use realtime::{NfPacketQueue, PacketQueue, QueueSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize the library with configuration
///
/// Loads configuration (an explicit path is required to exist; otherwise
/// `config.toml` is tried and defaults apply), initializes logging, and
/// returns the configuration together with the logging guard, which must be
/// kept alive for file logging.
pub async fn init_library(
    config_path: Option<&str>,
    verbosity: u8,
) -> FpResult<(AppConfig, Option<tracing_appender::non_blocking::WorkerGuard>)> {
    use tracing::info;

    let config = match config_path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load_or_default("config.toml")?,
    };

    let guard = logging::init_logging(&config.logging, verbosity)?;

    info!("{} v{} initialized", NAME, VERSION);

    Ok((config, guard))
}

/// Parse a comma-separated list of haiku symbols
///
/// Every symbol is validated against the dictionary up front so that a typo
/// in an allow/deny list fails at startup, not at match time.
pub fn parse_symbol_list(csv: &str) -> FpResult<Vec<String>> {
    if csv.trim().is_empty() {
        return Ok(Vec::new());
    }

    let symbols: Vec<String> = csv
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    for symbol in &symbols {
        haiku::decode(symbol)?;
    }

    Ok(symbols)
}

/// Compile a user-supplied byte-regex, mapping failures to `BadRegex`
pub fn compile_payload_regex(pattern: &str) -> FpResult<regex::bytes::Regex> {
    regex::bytes::Regex::new(pattern).map_err(|e| FpError::bad_regex(pattern, e.to_string()))
}
