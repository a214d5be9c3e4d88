use tracing::warn;

use crate::block::{BlockBuffer, FileContext, LogicalRange, PAGE_SIZE};
use crate::error::TransformError;
use crate::request::ReadRequest;
use crate::service::BufferCache;

// ── Transform IDs ──────────────────────────────────────────────────────────

pub const TRANSFORM_ENCRYPT: u16 = 0;
pub const TRANSFORM_ZSTD: u16 = 1;
pub const TRANSFORM_LZ4: u16 = 2;

/// Default zstd level used when a transform is resolved from its id.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compression backends available behind [`ExtentTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Lz4,
    Zstd { level: i32 },
}

/// What an extent transform does to the blocks of an extent.
///
/// Compression variants own a scratch workspace; `Encrypt` has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Compress(CompressionAlgorithm),
    Encrypt,
}

impl TransformKind {
    /// Stable numeric id recorded alongside an extent.
    pub fn id(&self) -> u16 {
        match self {
            TransformKind::Encrypt => TRANSFORM_ENCRYPT,
            TransformKind::Compress(CompressionAlgorithm::Zstd { .. }) => TRANSFORM_ZSTD,
            TransformKind::Compress(CompressionAlgorithm::Lz4) => TRANSFORM_LZ4,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            TRANSFORM_ENCRYPT => Some(TransformKind::Encrypt),
            TRANSFORM_ZSTD => Some(TransformKind::Compress(CompressionAlgorithm::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            })),
            TRANSFORM_LZ4 => Some(TransformKind::Compress(CompressionAlgorithm::Lz4)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Encrypt => "encrypt",
            TransformKind::Compress(CompressionAlgorithm::Zstd { .. }) => "zstd",
            TransformKind::Compress(CompressionAlgorithm::Lz4) => "lz4",
        }
    }

    /// Encrypted extents keep their byte length; compressed ones do not.
    pub fn is_length_preserving(&self) -> bool {
        matches!(self, TransformKind::Encrypt)
    }

    pub fn has_workspace(&self) -> bool {
        matches!(self, TransformKind::Compress(_))
    }
}

// ── Configuration ──────────────────────────────────────────────────────────

/// Settings every transform is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformConfig {
    /// Filesystem block size in bytes. Must equal [`PAGE_SIZE`].
    pub block_size: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            block_size: PAGE_SIZE,
        }
    }
}

impl TransformConfig {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Reject any block size other than the page size. Not retryable.
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.block_size != PAGE_SIZE {
            warn!(
                block_size = self.block_size,
                page_size = PAGE_SIZE,
                "block size does not match page size"
            );
            return Err(TransformError::Configuration(format!(
                "block size {} is not the page size {}",
                self.block_size, PAGE_SIZE
            )));
        }
        Ok(())
    }
}

// ── Transform trait ────────────────────────────────────────────────────────

/// Result of [`ExtentTransform::encode`].
#[derive(Debug)]
pub struct EncodedExtent {
    /// Output blocks in ascending logical order, ready for placement on disk.
    pub blocks: Vec<BlockBuffer>,
    /// Plaintext bytes consumed.
    pub bytes_in: usize,
    /// Bytes of meaningful output across `blocks`.
    pub bytes_out: usize,
}

/// Codec-agnostic interface the extent engine drives.
///
/// Each implementation:
/// - Turns a logical range resident in a [`BufferCache`] into output blocks.
/// - Decodes a single block into a destination buffer.
/// - Decodes a whole batch of stored blocks straight into a [`ReadRequest`],
///   so the engine has one decode entry point for every kind of extent.
///
/// All three operations run synchronously on the calling thread and abort on
/// the first failure. Outputs produced before a failure are never returned.
pub trait ExtentTransform: Send + Sync {
    fn kind(&self) -> TransformKind;

    /// Human-readable name for CLI display.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Encode `range` of the file `ctx`, producing at most `max_out_blocks` blocks.
    fn encode(
        &self,
        ctx: &FileContext,
        cache: &dyn BufferCache,
        range: LogicalRange,
        max_out_blocks: usize,
    ) -> Result<EncodedExtent, TransformError>;

    /// Decode `input` into `dest`, starting `start_byte` bytes into the
    /// decoded block. `max_out` is the destination capacity the caller grants.
    ///
    /// Returns the number of plaintext bytes written.
    fn decode_block(
        &self,
        input: &[u8],
        dest: &mut BlockBuffer,
        start_byte: usize,
        max_out: usize,
    ) -> Result<usize, TransformError>;

    /// Decode `total_len` stored bytes held in `input` and deliver the
    /// plaintext, which starts at logical offset `disk_start`, into `request`.
    ///
    /// `input` may be modified in place.
    fn decode_stream(
        &self,
        input: &mut [BlockBuffer],
        disk_start: u64,
        request: &mut ReadRequest,
        total_len: usize,
    ) -> Result<(), TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_kind() {
        for id in [TRANSFORM_ENCRYPT, TRANSFORM_ZSTD, TRANSFORM_LZ4] {
            assert_eq!(TransformKind::from_id(id).unwrap().id(), id);
        }
        assert!(TransformKind::from_id(42).is_none());
    }

    #[test]
    fn only_compression_has_a_workspace() {
        assert!(!TransformKind::Encrypt.has_workspace());
        assert!(TransformKind::Encrypt.is_length_preserving());
        let lz4 = TransformKind::Compress(CompressionAlgorithm::Lz4);
        assert!(lz4.has_workspace());
        assert!(!lz4.is_length_preserving());
    }

    #[test]
    fn config_rejects_non_page_block_size() {
        assert!(TransformConfig::default().validate().is_ok());
        let err = TransformConfig::new(16 * 1024).validate().unwrap_err();
        assert!(matches!(err, TransformError::Configuration(_)));
    }
}
