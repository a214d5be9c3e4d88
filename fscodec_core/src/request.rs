use crate::block::{BlockBuffer, FileContext, LogicalRange, PAGE_SIZE};

/// Downstream consumer that copies decoded plaintext into a read request.
///
/// Decoders call [`feed`](Self::feed) with plaintext in ascending logical
/// order, then [`zero_fill_remaining`](Self::zero_fill_remaining) once they
/// are done so no destination byte is left stale.
pub trait ReassemblyConsumer {
    /// Copy `plaintext`, which covers logical bytes `[dest_start, dest_end)`,
    /// into the destination buffers it overlaps.
    ///
    /// Returns `true` while destination buffers still want data.
    fn feed(&mut self, plaintext: &[u8], dest_start: u64, dest_end: u64) -> bool;

    /// Zero every destination byte that has not been filled yet.
    fn zero_fill_remaining(&mut self);
}

/// An in-flight read: destination buffers owned by the caller plus a fill cursor.
///
/// Buffers are filled in order. Buffer `i` wants at most
/// `min(PAGE_SIZE, len - i * PAGE_SIZE)` bytes, starting at its own logical
/// offset. The request never reallocates or reorders its buffers.
#[derive(Debug)]
pub struct ReadRequest {
    buffers: Vec<BlockBuffer>,
    len: usize,
    /// Buffer currently being filled.
    cursor: usize,
    /// Bytes already written into `buffers[cursor]`.
    filled: usize,
}

impl ReadRequest {
    /// Wrap caller buffers. `len` is clamped to what the buffers can hold.
    pub fn new(buffers: Vec<BlockBuffer>, len: usize) -> Self {
        let len = len.min(buffers.len() * PAGE_SIZE);
        Self {
            buffers,
            len,
            cursor: 0,
            filled: 0,
        }
    }

    /// Fresh mapped buffers covering `range` of the file `owner`.
    pub fn for_range(owner: FileContext, range: LogicalRange) -> Self {
        let first = range.first_index();
        let buffers = (0..range.block_count() as u64)
            .map(|i| BlockBuffer::mapped(owner, first + i))
            .collect();
        Self::new(buffers, range.len)
    }

    pub fn buffers(&self) -> &[BlockBuffer] {
        &self.buffers
    }

    /// Destination buffer at cursor position `i`.
    pub fn buffer(&self, i: usize) -> Option<&BlockBuffer> {
        self.buffers.get(i)
    }

    pub fn into_buffers(self) -> Vec<BlockBuffer> {
        self.buffers
    }

    /// Logical bytes the caller asked for.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether any destination buffer was supplied, even if `len` is zero.
    pub fn has_buffers(&self) -> bool {
        !self.buffers.is_empty()
    }

    /// Bytes filled so far, counting from the first buffer.
    pub fn filled_bytes(&self) -> usize {
        (0..self.cursor).map(|i| self.limit(i)).sum::<usize>() + self.filled
    }

    pub fn is_complete(&self) -> bool {
        self.filled_bytes() >= self.len
    }

    /// The first `len` bytes of the request, concatenated.
    pub fn contents(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for (i, buf) in self.buffers.iter().enumerate() {
            out.extend_from_slice(&buf.as_slice()[..self.limit(i)]);
        }
        out
    }

    /// Bytes buffer `i` takes part in the request with.
    fn limit(&self, i: usize) -> usize {
        if i >= self.buffers.len() {
            return 0;
        }
        self.len.saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE)
    }
}

impl ReassemblyConsumer for ReadRequest {
    fn feed(&mut self, plaintext: &[u8], dest_start: u64, dest_end: u64) -> bool {
        let dest_end = dest_end.min(dest_start.saturating_add(plaintext.len() as u64));
        loop {
            let limit = self.limit(self.cursor);
            if limit == 0 {
                return false;
            }
            let buf_start = self.buffers[self.cursor].offset();
            let buf_end = buf_start.saturating_add(limit as u64);
            let pos = buf_start + self.filled as u64;
            if pos >= dest_end {
                return true;
            }

            let filled = self.filled;
            let dst = self.buffers[self.cursor].as_mut_slice();
            if pos < dest_start {
                // Plaintext arrives in ascending order: nothing will ever cover this gap.
                let gap_end = dest_start.min(buf_end);
                let n = (gap_end - pos) as usize;
                dst[filled..filled + n].fill(0);
                self.filled += n;
            } else {
                let n = (dest_end.min(buf_end) - pos) as usize;
                let src = (pos - dest_start) as usize;
                dst[filled..filled + n].copy_from_slice(&plaintext[src..src + n]);
                self.filled += n;
            }

            if self.filled == limit {
                self.cursor += 1;
                self.filled = 0;
            }
        }
    }

    fn zero_fill_remaining(&mut self) {
        for i in 0..self.buffers.len() {
            let fill_level = if i < self.cursor {
                self.limit(i)
            } else if i == self.cursor {
                self.filled
            } else {
                0
            };
            self.buffers[i].as_mut_slice()[fill_level..].fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale_request(first_index: u64, count: u64, len: usize) -> ReadRequest {
        let owner = FileContext::new(1);
        let buffers = (0..count)
            .map(|i| {
                let mut b = BlockBuffer::mapped(owner, first_index + i);
                b.as_mut_slice().fill(0xaa);
                b
            })
            .collect();
        ReadRequest::new(buffers, len)
    }

    #[test]
    fn feed_fills_buffers_in_order() {
        let mut req = stale_request(0, 2, 2 * PAGE_SIZE);
        let first = vec![1u8; PAGE_SIZE];
        let second = vec![2u8; PAGE_SIZE];

        assert!(req.feed(&first, 0, PAGE_SIZE as u64));
        assert_eq!(req.filled_bytes(), PAGE_SIZE);
        assert!(!req.feed(&second, PAGE_SIZE as u64, 2 * PAGE_SIZE as u64));
        assert!(req.is_complete());

        let out = req.contents();
        assert!(out[..PAGE_SIZE].iter().all(|&b| b == 1));
        assert!(out[PAGE_SIZE..].iter().all(|&b| b == 2));
    }

    #[test]
    fn feed_skips_plaintext_before_the_request() {
        // Request covers block 1 only; the extent starts at block 0.
        let mut req = stale_request(1, 1, PAGE_SIZE);
        let mut extent = vec![0u8; 2 * PAGE_SIZE];
        extent[PAGE_SIZE..].fill(7);

        assert!(req.feed(&extent[..PAGE_SIZE], 0, PAGE_SIZE as u64));
        assert_eq!(req.filled_bytes(), 0);
        assert!(!req.feed(&extent[PAGE_SIZE..], PAGE_SIZE as u64, 2 * PAGE_SIZE as u64));
        assert!(req.contents().iter().all(|&b| b == 7));
    }

    #[test]
    fn feed_handles_chunks_smaller_than_a_block() {
        let mut req = stale_request(0, 1, PAGE_SIZE);
        let data: Vec<u8> = (0..PAGE_SIZE).map(|i| i as u8).collect();
        for chunk_start in (0..PAGE_SIZE).step_by(1000) {
            let chunk_end = (chunk_start + 1000).min(PAGE_SIZE);
            req.feed(&data[chunk_start..chunk_end], chunk_start as u64, chunk_end as u64);
        }
        assert_eq!(req.contents(), data);
    }

    #[test]
    fn zero_fill_touches_only_unfilled_tail() {
        let len = 10_000;
        let mut req = stale_request(0, 3, len);
        let data = vec![3u8; len];
        assert!(!req.feed(&data, 0, len as u64));
        req.zero_fill_remaining();

        let bufs = req.into_buffers();
        assert!(bufs[0].as_slice().iter().all(|&b| b == 3));
        assert!(bufs[1].as_slice().iter().all(|&b| b == 3));
        let tail_start = len - 2 * PAGE_SIZE;
        assert!(bufs[2].as_slice()[..tail_start].iter().all(|&b| b == 3));
        assert!(bufs[2].as_slice()[tail_start..].iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_fill_clears_untouched_buffers() {
        let mut req = stale_request(0, 2, 2 * PAGE_SIZE);
        req.feed(&[9u8; 100], 0, 100);
        req.zero_fill_remaining();

        let bufs = req.into_buffers();
        assert!(bufs[0].as_slice()[..100].iter().all(|&b| b == 9));
        assert!(bufs[0].as_slice()[100..].iter().all(|&b| b == 0));
        assert!(bufs[1].as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn len_is_clamped_to_buffer_capacity() {
        let req = stale_request(0, 1, 3 * PAGE_SIZE);
        assert_eq!(req.len(), PAGE_SIZE);
    }

    #[test]
    fn emptiness_follows_len_not_buffers() {
        let req = stale_request(0, 2, 0);
        assert_eq!(req.len(), 0);
        assert!(req.is_empty());
        assert!(req.has_buffers());

        let req = ReadRequest::new(Vec::new(), PAGE_SIZE);
        assert_eq!(req.len(), 0);
        assert!(req.is_empty());
        assert!(!req.has_buffers());

        let req = stale_request(0, 1, 1);
        assert!(!req.is_empty());
        assert!(req.has_buffers());
    }

    #[test]
    fn feed_near_the_end_of_the_address_space_saturates() {
        let mut req = stale_request(0, 1, PAGE_SIZE);
        let dest_start = u64::MAX - 10;
        assert!(!req.feed(&[5u8; 64], dest_start, u64::MAX));
        // Nothing lands before `dest_start`, so the whole buffer is a gap.
        assert!(req.contents().iter().all(|&b| b == 0));
    }
}
