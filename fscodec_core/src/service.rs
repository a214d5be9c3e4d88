use std::collections::HashMap;

use crate::block::{BlockBuffer, FileContext, PAGE_SIZE};
use crate::error::{ServiceError, TransformError};

/// Per-block confidentiality transform (the "fscrypt" side of the pipeline).
///
/// fscodec never touches keys or ciphers. It only supplies the file context
/// and a tweak derived from the block position. Implementations must be
/// length-preserving: `encrypt` returns exactly `plaintext.len()` bytes.
///
/// Calls may block (key lookup); run transforms off any cooperative
/// scheduler's hot path.
pub trait ConfidentialityService: Send + Sync {
    /// Encrypt one block's worth of plaintext into a fresh ciphertext buffer.
    fn encrypt(
        &self,
        ctx: &FileContext,
        plaintext: &[u8],
        tweak: u64,
    ) -> Result<Vec<u8>, ServiceError>;

    /// Decrypt `block` in place. The slice length is the ciphertext length.
    fn decrypt_in_place(
        &self,
        ctx: &FileContext,
        block: &mut [u8],
        tweak: u64,
    ) -> Result<(), ServiceError>;
}

/// Source of resident plaintext blocks for the encoders.
pub trait BufferCache {
    fn find_block(&self, ctx: &FileContext, index: u64) -> Option<&BlockBuffer>;
}

/// Buffer cache backed by a `HashMap`, keyed by `(inode, block index)`.
#[derive(Debug, Default)]
pub struct MemCache {
    blocks: HashMap<(u64, u64), BlockBuffer>,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slice `data` into blocks owned by `ctx`, starting at byte offset `start`.
    ///
    /// `start` must be block aligned. Existing blocks at the same indices are replaced.
    pub fn populate(
        &mut self,
        ctx: FileContext,
        start: u64,
        data: &[u8],
    ) -> Result<usize, TransformError> {
        if start % PAGE_SIZE as u64 != 0 {
            return Err(TransformError::InvalidArgument(format!(
                "cache fill offset {} is not block aligned",
                start
            )));
        }
        let first = start / PAGE_SIZE as u64;
        let mut count = 0;
        for (i, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            self.insert(BlockBuffer::from_bytes(Some(ctx), first + i as u64, chunk)?)?;
            count += 1;
        }
        Ok(count)
    }

    /// Insert a mapped block; unmapped blocks have no place in the cache.
    pub fn insert(&mut self, block: BlockBuffer) -> Result<(), TransformError> {
        let owner = block.owner().ok_or_else(|| {
            TransformError::InvalidArgument(format!(
                "block {} has no owning file and cannot be cached",
                block.index()
            ))
        })?;
        self.blocks.insert((owner.ino, block.index()), block);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BufferCache for MemCache {
    fn find_block(&self, ctx: &FileContext, index: u64) -> Option<&BlockBuffer> {
        self.blocks.get(&(ctx.ino, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_splits_into_owned_blocks() {
        let ctx = FileContext::new(7);
        let data = vec![0x5a; PAGE_SIZE * 2 + 10];
        let mut cache = MemCache::new();
        assert_eq!(cache.populate(ctx, PAGE_SIZE as u64, &data).unwrap(), 3);

        let tail = cache.find_block(&ctx, 3).unwrap();
        assert_eq!(tail.owner(), Some(ctx));
        assert_eq!(&tail.as_slice()[..10], &[0x5a; 10]);
        assert_eq!(tail.as_slice()[10], 0);
        assert!(cache.find_block(&ctx, 0).is_none());
        assert!(cache.find_block(&FileContext::new(8), 1).is_none());
    }

    #[test]
    fn populate_rejects_unaligned_start() {
        let mut cache = MemCache::new();
        let err = cache.populate(FileContext::new(1), 100, b"x").unwrap_err();
        assert!(matches!(err, TransformError::InvalidArgument(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_rejects_unmapped_block() {
        let mut cache = MemCache::new();
        assert!(cache.insert(BlockBuffer::new(0)).is_err());
    }
}
