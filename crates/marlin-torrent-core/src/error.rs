//! Error types for torrent core services.

use std::error::Error;

use thiserror::Error;

/// Primary error type for torrent operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Operation is not supported by the underlying engine.
    #[error("torrent operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Operation failed in the underlying engine.
    #[error("torrent operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Info-hash of the torrent when available.
        info_hash: Option<String>,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Torrent was not found.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent info-hash.
        info_hash: String,
    },
    /// Source URI could not be interpreted.
    #[error("unrecognised torrent source")]
    InvalidSource {
        /// Offending URI.
        uri: String,
    },
    /// Metadata has not been received yet.
    #[error("torrent metadata not available")]
    MetadataUnavailable {
        /// Torrent info-hash.
        info_hash: String,
    },
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;
