use std::sync::Arc;

use fscodec_core::{
    blocks_for_len, BlockBuffer, BufferCache, ConfidentialityService, EncodedExtent,
    ExtentTransform, FileContext, LogicalRange, ReadRequest, ReassemblyConsumer, ServiceError,
    TransformConfig, TransformError, TransformKind, PAGE_SIZE,
};
use tracing::{debug, instrument, warn};

/// Per-block encryption codec.
///
/// Every block is handed to the [`ConfidentialityService`] on its own, with
/// the block's cache index as tweak, so identical plaintext blocks at
/// different positions encrypt differently. Encryption is length-preserving:
/// `n` plaintext blocks always become `n` ciphertext blocks.
///
/// Unlike the compression transforms this codec keeps no workspace; it holds
/// nothing but the service handle and is safe to share across threads.
pub struct EncryptTransform {
    service: Arc<dyn ConfidentialityService>,
}

impl EncryptTransform {
    /// Fails with [`TransformError::Configuration`] unless the block size is the page size.
    pub fn new(
        service: Arc<dyn ConfidentialityService>,
        config: TransformConfig,
    ) -> Result<Self, TransformError> {
        config.validate()?;
        Ok(Self { service })
    }
}

impl ExtentTransform for EncryptTransform {
    fn kind(&self) -> TransformKind {
        TransformKind::Encrypt
    }

    #[instrument(level = "debug", skip(self, cache), fields(ino = ctx.ino))]
    fn encode(
        &self,
        ctx: &FileContext,
        cache: &dyn BufferCache,
        range: LogicalRange,
        max_out_blocks: usize,
    ) -> Result<EncodedExtent, TransformError> {
        if !range.is_block_aligned() {
            return Err(TransformError::InvalidArgument(format!(
                "extent start {} is not block aligned",
                range.start
            )));
        }
        let needed = range.block_count();
        if max_out_blocks < needed {
            return Err(TransformError::InvalidArgument(format!(
                "{} bytes need {} blocks but only {} were offered",
                range.len, needed, max_out_blocks
            )));
        }

        let first = range.first_index();
        let sources = (first..first + needed as u64)
            .map(|index| {
                cache.find_block(ctx, index).ok_or_else(|| {
                    TransformError::InvalidArgument(format!(
                        "block {} of inode {} is not in the buffer cache",
                        index, ctx.ino
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = EncodedExtent {
            blocks: Vec::with_capacity(needed),
            bytes_in: 0,
            bytes_out: 0,
        };
        let mut bytes_left = range.len;
        for source in sources {
            let index = source.index();
            let pt_len = bytes_left.min(PAGE_SIZE);
            let ciphertext = self
                .service
                .encrypt(ctx, &source.as_slice()[..pt_len], index)
                .map_err(|e| TransformError::service(index, e))?;
            if ciphertext.len() != pt_len {
                return Err(TransformError::service(
                    index,
                    ServiceError::Backend(format!(
                        "service returned {} bytes for a {}-byte block",
                        ciphertext.len(),
                        pt_len
                    )),
                ));
            }

            out.blocks.push(BlockBuffer::from_bytes(None, index, &ciphertext)?);
            out.bytes_in += pt_len;
            out.bytes_out += pt_len;
            bytes_left -= pt_len;
        }

        debug!(blocks = out.blocks.len(), bytes = out.bytes_out, "encrypted extent");
        Ok(out)
    }

    #[instrument(level = "debug", skip(self, input, dest), fields(index = dest.index(), len = input.len()))]
    fn decode_block(
        &self,
        input: &[u8],
        dest: &mut BlockBuffer,
        start_byte: usize,
        max_out: usize,
    ) -> Result<usize, TransformError> {
        if input.len() > PAGE_SIZE || max_out < PAGE_SIZE {
            return Err(TransformError::InvalidArgument(format!(
                "cannot decrypt {} bytes into {} bytes of space; the limit is one {}-byte block",
                input.len(),
                max_out,
                PAGE_SIZE
            )));
        }
        let ctx = dest.owner().ok_or_else(|| {
            TransformError::InvalidArgument(format!(
                "destination block {} is not mapped to a file",
                dest.index()
            ))
        })?;
        if start_byte != 0 {
            warn!(start_byte, "decrypt requested from inside a block");
            return Err(TransformError::Configuration(format!(
                "decrypting from byte {} of a block is not supported",
                start_byte
            )));
        }

        let index = dest.index();
        let plaintext = &mut dest.as_mut_slice()[..input.len()];
        plaintext.copy_from_slice(input);
        self.service
            .decrypt_in_place(&ctx, plaintext, index)
            .map_err(|e| TransformError::service(index, e))?;
        Ok(input.len())
    }

    #[instrument(level = "debug", skip(self, input, request), fields(blocks = input.len()))]
    fn decode_stream(
        &self,
        input: &mut [BlockBuffer],
        disk_start: u64,
        request: &mut ReadRequest,
        total_len: usize,
    ) -> Result<(), TransformError> {
        let ctx = request
            .buffer(0)
            .ok_or_else(|| {
                TransformError::InvalidArgument("read request has no destination buffers".into())
            })?
            .owner()
            .ok_or_else(|| {
                TransformError::InvalidArgument(
                    "read request destination is not mapped to a file".into(),
                )
            })?;
        let expected = blocks_for_len(total_len);
        if input.len() != expected {
            return Err(TransformError::InvalidArgument(format!(
                "{} ciphertext bytes need {} blocks, got {}",
                total_len,
                expected,
                input.len()
            )));
        }

        disk_start.checked_add(total_len as u64).ok_or_else(|| {
            TransformError::InvalidArgument(format!(
                "extent at {} with {} bytes overflows u64",
                disk_start, total_len
            ))
        })?;

        let mut bytes_left = total_len;
        let mut processed = 0usize;
        // `dest_cursor` walks the request's buffers in lock-step with the
        // ciphertext. The tweak for ciphertext block `i` is the index of
        // destination buffer `i`, never `input[i].index()`: stored blocks are
        // decrypted under the position they are being read into.
        for (dest_cursor, block) in input.iter_mut().enumerate() {
            let tweak = request
                .buffer(dest_cursor)
                .map(BlockBuffer::index)
                .ok_or_else(|| {
                    TransformError::InvalidArgument(format!(
                        "read request ran out of destination buffers at ciphertext block {}",
                        dest_cursor
                    ))
                })?;
            let cur_len = bytes_left.min(PAGE_SIZE);
            let plaintext = &mut block.as_mut_slice()[..cur_len];
            self.service
                .decrypt_in_place(&ctx, plaintext, tweak)
                .map_err(|e| TransformError::service(tweak, e))?;

            // Cannot overflow: bounded by `disk_start + total_len`, checked above.
            let dest_start = disk_start + processed as u64;
            let more = request.feed(plaintext, dest_start, dest_start + cur_len as u64);
            bytes_left -= cur_len;
            processed += cur_len;
            if !more {
                break;
            }
        }

        request.zero_fill_remaining();
        debug!(processed, filled = request.filled_bytes(), "decrypted extent into request");
        Ok(())
    }
}
