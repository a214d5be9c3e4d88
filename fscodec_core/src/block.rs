use std::fmt;

use crate::error::TransformError;

/// Size of a memory page in bytes. fscodec only runs with block size == page size.
pub const PAGE_SIZE: usize = 4096;

/// `log2(PAGE_SIZE)`, used to turn byte offsets into block indices.
pub const PAGE_SHIFT: u32 = 12;

/// Number of whole blocks needed to hold `len` bytes.
#[inline]
pub fn blocks_for_len(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

// ── File context ───────────────────────────────────────────────────────────

/// Identifies the file a block belongs to.
///
/// Handed to the confidentiality service on every call so it can derive the
/// per-file key. fscodec never looks inside it beyond the inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileContext {
    pub ino: u64,
}

impl FileContext {
    pub fn new(ino: u64) -> Self {
        Self { ino }
    }
}

// ── Block buffer ───────────────────────────────────────────────────────────

/// One page of data, tagged with its cache index and the file that owns it.
///
/// A buffer without an owner is "unmapped": ciphertext bounce buffers produced
/// by an encoder are unmapped, destination buffers of a read request are not.
#[derive(Clone)]
pub struct BlockBuffer {
    index: u64,
    owner: Option<FileContext>,
    data: Box<[u8]>,
}

impl BlockBuffer {
    /// A zeroed, unmapped buffer at `index`.
    pub fn new(index: u64) -> Self {
        Self {
            index,
            owner: None,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// A zeroed buffer at `index` owned by `owner`.
    pub fn mapped(owner: FileContext, index: u64) -> Self {
        Self {
            owner: Some(owner),
            ..Self::new(index)
        }
    }

    /// Build a buffer whose leading bytes are `bytes`; the tail stays zero.
    pub fn from_bytes(
        owner: Option<FileContext>,
        index: u64,
        bytes: &[u8],
    ) -> Result<Self, TransformError> {
        if bytes.len() > PAGE_SIZE {
            return Err(TransformError::InvalidArgument(format!(
                "{} bytes do not fit in a {}-byte block",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let mut block = Self {
            owner,
            ..Self::new(index)
        };
        block.data[..bytes.len()].copy_from_slice(bytes);
        Ok(block)
    }

    /// Cache index of this block; also the tweak handed to the transform service.
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub fn owner(&self) -> Option<FileContext> {
        self.owner
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.owner.is_some()
    }

    /// Logical byte offset of the first byte of this block within its file.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.index << PAGE_SHIFT
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockBuffer")
            .field("index", &self.index)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

// ── Logical range ──────────────────────────────────────────────────────────

/// A contiguous span `[start, start + len)` of a file's plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalRange {
    pub start: u64,
    pub len: usize,
}

impl LogicalRange {
    pub fn new(start: u64, len: usize) -> Self {
        Self { start, len }
    }

    /// Index of the block holding `start`.
    #[inline]
    pub fn first_index(&self) -> u64 {
        self.start >> PAGE_SHIFT
    }

    /// `ceil(len / PAGE_SIZE)`.
    #[inline]
    pub fn block_count(&self) -> usize {
        blocks_for_len(self.len)
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.len as u64
    }

    #[inline]
    pub fn is_block_aligned(&self) -> bool {
        self.start % PAGE_SIZE as u64 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(LogicalRange::new(0, 0).block_count(), 0);
        assert_eq!(LogicalRange::new(0, 1).block_count(), 1);
        assert_eq!(LogicalRange::new(0, PAGE_SIZE).block_count(), 1);
        assert_eq!(LogicalRange::new(0, 10_000).block_count(), 3);
    }

    #[test]
    fn first_index_follows_offset() {
        let range = LogicalRange::new(3 * PAGE_SIZE as u64, 100);
        assert_eq!(range.first_index(), 3);
        assert!(range.is_block_aligned());
        assert!(!LogicalRange::new(17, 100).is_block_aligned());
    }

    #[test]
    fn from_bytes_rejects_oversized_input() {
        let big = vec![1u8; PAGE_SIZE + 1];
        let err = BlockBuffer::from_bytes(None, 0, &big).unwrap_err();
        assert!(matches!(err, TransformError::InvalidArgument(_)));
    }

    #[test]
    fn from_bytes_zero_pads_tail() {
        let block = BlockBuffer::from_bytes(Some(FileContext::new(9)), 4, b"abc").unwrap();
        assert_eq!(&block.as_slice()[..3], b"abc");
        assert!(block.as_slice()[3..].iter().all(|&b| b == 0));
        assert_eq!(block.offset(), 4 * PAGE_SIZE as u64);
        assert!(block.is_mapped());
    }
}
