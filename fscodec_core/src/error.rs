//! Error types shared by every extent transform.

use std::io;

/// Failure reported by a confidentiality transform service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No key is available for the file (locked keyring, missing policy).
    #[error("encryption key unavailable for inode {ino}")]
    KeyUnavailable { ino: u64 },
    /// Ciphertext failed authentication; data is corrupted or tampered.
    #[error("ciphertext authentication failed")]
    AuthenticationFailed,
    /// Any other backend failure.
    #[error("transform backend error: {0}")]
    Backend(String),
}

/// All errors an extent transform can return.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Fatal setup problem (block size mismatch, unsupported intra-block offset).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Caller broke the operation's contract; nothing was modified.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The confidentiality service failed on the block with tweak `index`.
    #[error("confidentiality transform failed on block {index}: {source}")]
    Service {
        index: u64,
        #[source]
        source: ServiceError,
    },
    /// Compression backend failure or output that does not fit.
    #[error("compression failed: {0}")]
    Compression(String),
}

impl TransformError {
    pub fn service(index: u64, source: ServiceError) -> Self {
        Self::Service { index, source }
    }
}

/// Decode failures surface as read errors, encode failures as write errors.
impl From<TransformError> for io::Error {
    fn from(err: TransformError) -> Self {
        let kind = match &err {
            TransformError::Configuration(_) => io::ErrorKind::Unsupported,
            TransformError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            TransformError::Service { .. } | TransformError::Compression(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
