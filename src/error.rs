/// Error handling for clockprint
///
/// This module defines all custom error types and implements proper error handling
/// throughout the application using thiserror for ergonomic error definitions.
/// Per-packet soft failures (no TCP layer, no usable timestamp) live in
/// `fingerprint::DeriveError` and never reach these variants.

use thiserror::Error;
use tracing::error;

/// Main error type for clockprint
#[derive(Error, Debug)]
pub enum FpError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A word of a haiku symbol is not in the dictionary, or the symbol is empty
    #[error("Bad symbol: {symbol:?} - {reason}")]
    BadSymbol { symbol: String, reason: String },

    /// Payload or secret regex failed to compile
    #[error("Bad regex: {pattern:?} - {reason}")]
    BadRegex { pattern: String, reason: String },

    /// BPF filter expression rejected by the capture source
    #[error("Bad BPF filter: {expr:?} - {reason}")]
    BadBpf { expr: String, reason: String },

    /// Failed to open the offline packet source
    #[error("Failed to open source {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    /// Failed to open the pcap sink
    #[error("Failed to open sink {path}: {reason}")]
    SinkOpen { path: String, reason: String },

    /// Kernel queue transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Malformed packet in the offline stream
    #[error("Malformed packet: {message}")]
    MalformedPacket { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {reason}")]
    Validation { field: String, reason: String },
}

/// Result type alias for clockprint operations
pub type FpResult<T> = Result<T, FpError>;

impl FpError {
    /// Create a bad-symbol error
    pub fn bad_symbol<S1: Into<String>, S2: Into<String>>(symbol: S1, reason: S2) -> Self {
        FpError::BadSymbol {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Create a bad-regex error
    pub fn bad_regex<S1: Into<String>, S2: Into<String>>(pattern: S1, reason: S2) -> Self {
        FpError::BadRegex {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a bad-BPF error
    pub fn bad_bpf<S1: Into<String>, S2: Into<String>>(expr: S1, reason: S2) -> Self {
        FpError::BadBpf {
            expr: expr.into(),
            reason: reason.into(),
        }
    }

    /// Create a source-open error
    pub fn source_open<S1: Into<String>, S2: Into<String>>(path: S1, reason: S2) -> Self {
        FpError::SourceOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a sink-open error
    pub fn sink_open<S1: Into<String>, S2: Into<String>>(path: S1, reason: S2) -> Self {
        FpError::SinkOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        FpError::Transport {
            message: message.into(),
        }
    }

    /// Create a malformed-packet error
    pub fn malformed_packet<S: Into<String>>(message: S) -> Self {
        FpError::MalformedPacket {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, reason: S2) -> Self {
        FpError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must abort the pipeline (exit code 1)
    ///
    /// Transport and malformed-packet errors are recoverable: the pipelines
    /// log them and continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FpError::Transport { .. } | FpError::MalformedPacket { .. }
        )
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        match self {
            FpError::Transport { .. } | FpError::MalformedPacket { .. } => {
                tracing::warn!("Recoverable error: {}", self);
            }
            _ => {
                error!("Error: {}", self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = FpError::bad_symbol("blue-frg", "unknown word: frg");
        assert!(matches!(err, FpError::BadSymbol { .. }));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FpError::bad_regex("(", "unclosed group").is_fatal());
        assert!(FpError::bad_bpf("tcp port", "syntax error").is_fatal());
        assert!(FpError::source_open("in.pcap", "no such file").is_fatal());
        assert!(!FpError::transport("enobufs").is_fatal());
        assert!(!FpError::malformed_packet("truncated header").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = FpError::validation("queue", "must fit in u16");
        assert!(err.to_string().contains("queue"));
        assert!(err.to_string().contains("must fit in u16"));
    }
}
