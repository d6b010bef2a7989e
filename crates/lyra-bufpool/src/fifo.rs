use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
    error::{PoolError, PoolResult},
    item::PoolAllocItem,
};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Sizing for a [`FifoMemoryPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    /// Size of one block in bytes.
    pub block_size: usize,
    /// Blocks allocated up front. The pool never shrinks below this.
    pub initial_blocks: usize,
    /// Free bytes above which a release tries to give blocks back.
    pub shrink_threshold: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            initial_blocks: 16,
            shrink_threshold: 2 * 1024 * 1024,
        }
    }
}

impl PoolOptions {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_initial_blocks(mut self, initial_blocks: usize) -> Self {
        self.initial_blocks = initial_blocks.max(1);
        self
    }

    pub fn with_shrink_threshold(mut self, shrink_threshold: usize) -> Self {
        self.shrink_threshold = shrink_threshold;
        self
    }
}

/// Point-in-time accounting of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub total_size: usize,
    pub free_size: usize,
    pub outstanding: usize,
    pub outstanding_bytes: usize,
    pub blocks: usize,
}

/// Position inside the block ring. `offset < block_size` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Cursor {
    pub(crate) block: usize,
    pub(crate) offset: usize,
}

#[derive(Clone, Copy, Debug)]
struct Allocation {
    id: u64,
    start: Cursor,
    len: usize,
    open: bool,
    /// Handle dropped while interior; reclaimed once it reaches either end.
    dropped: bool,
}

struct PoolInner {
    blocks: Vec<Box<[u8]>>,
    block_size: usize,
    initial_blocks: usize,
    shrink_threshold: usize,
    /// End of the newest allocation.
    write: Cursor,
    /// Oldest first.
    outstanding: VecDeque<Allocation>,
    used: usize,
    next_id: u64,
}

impl PoolInner {
    fn new(options: PoolOptions) -> Self {
        let block_size = options.block_size.max(1);
        let initial_blocks = options.initial_blocks.max(1);
        Self {
            blocks: (0..initial_blocks)
                .map(|_| vec![0u8; block_size].into_boxed_slice())
                .collect(),
            block_size,
            initial_blocks,
            shrink_threshold: options.shrink_threshold,
            write: Cursor {
                block: 0,
                offset: 0,
            },
            outstanding: VecDeque::new(),
            used: 0,
            next_id: 1,
        }
    }

    fn total_size(&self) -> usize {
        self.blocks.len() * self.block_size
    }

    fn free_size(&self) -> usize {
        self.total_size() - self.used
    }

    fn reclaim_cursor(&self) -> Cursor {
        self.outstanding
            .front()
            .map_or(self.write, |alloc| alloc.start)
    }

    fn advance(&self, cursor: Cursor, bytes: usize) -> Cursor {
        let linear = cursor.offset + bytes;
        Cursor {
            block: (cursor.block + linear / self.block_size) % self.blocks.len(),
            offset: linear % self.block_size,
        }
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.outstanding.iter().rposition(|alloc| alloc.id == id)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total_size: self.total_size(),
            free_size: self.free_size(),
            outstanding: self.outstanding.len(),
            outstanding_bytes: self.used,
            blocks: self.blocks.len(),
        }
    }

    /// Adds one block of free space right at the write cursor.
    fn grow(&mut self) {
        let mut fresh = vec![0u8; self.block_size].into_boxed_slice();

        if self.used == 0 || self.reclaim_cursor() < self.write {
            // Used bytes sit between reclaim and write without crossing the end
            // of the ring, so everything past the last block is free already.
            self.blocks.push(fresh);
            trace!(blocks = self.blocks.len(), "FifoMemoryPool: appended block");
            return;
        }

        let w = self.write.block;
        let split = self.write.offset;
        let mut oldest = self.reclaim_cursor();
        if split == 0 {
            self.blocks.insert(w, fresh);
            if oldest.block >= w {
                oldest.block += 1;
            }
        } else {
            // The tail of block `w` may hold the oldest bytes; move it into the
            // new block so the free gap opens exactly at the cursor.
            fresh[split..].copy_from_slice(&self.blocks[w][split..]);
            self.blocks.insert(w + 1, fresh);
            if oldest.block > w || (oldest.block == w && oldest.offset >= split) {
                oldest.block += 1;
            }
        }
        self.rechain(oldest);
        trace!(
            blocks = self.blocks.len(),
            at = w,
            "FifoMemoryPool: inserted block after write cursor"
        );
    }

    /// Re-derive every start from the oldest one; allocations are contiguous.
    fn rechain(&mut self, oldest: Cursor) {
        let mut cursor = oldest;
        for i in 0..self.outstanding.len() {
            self.outstanding[i].start = cursor;
            cursor = self.advance(cursor, self.outstanding[i].len);
        }
    }

    fn alloc(&mut self, size: usize) -> Allocation {
        while self.free_size() < size {
            self.grow();
        }
        let alloc = Allocation {
            id: self.next_id,
            start: self.write,
            len: size,
            open: true,
            dropped: false,
        };
        self.next_id += 1;
        self.write = self.advance(self.write, size);
        self.used += size;
        self.outstanding.push_back(alloc);
        alloc
    }

    fn grow_alloc(&mut self, id: u64, extra: usize) -> PoolResult<()> {
        match self.outstanding.back() {
            Some(last) if last.id == id && last.open => {}
            Some(last) if last.id == id => {
                return Err(PoolError::NotGrowable {
                    id,
                    reason: "allocation is sealed",
                });
            }
            _ if self.position(id).is_some() => {
                return Err(PoolError::NotGrowable {
                    id,
                    reason: "allocation is not the newest",
                });
            }
            _ => return Err(PoolError::UnknownItem { id }),
        }

        while self.free_size() < extra {
            self.grow();
        }
        self.write = self.advance(self.write, extra);
        self.used += extra;
        if let Some(last) = self.outstanding.back_mut() {
            last.len += extra;
        }
        Ok(())
    }

    fn seal(&mut self, id: u64) {
        if let Some(pos) = self.position(id) {
            self.outstanding[pos].open = false;
        }
    }

    fn free(&mut self, id: u64) -> PoolResult<()> {
        let front = self.outstanding.front().map(|alloc| alloc.id);
        let back = self.outstanding.back().map(|alloc| alloc.id);

        if front == Some(id) {
            self.pop_front();
        } else if back == Some(id) {
            self.pop_back();
        } else if self.position(id).is_some() {
            return Err(PoolError::NotSupported { id });
        } else {
            return Err(PoolError::UnknownItem { id });
        }

        self.reclaim_dropped();
        self.maybe_shrink();
        Ok(())
    }

    /// Free `id` if it sits at either end, otherwise leave a tombstone.
    fn abandon(&mut self, id: u64) -> PoolResult<()> {
        match self.free(id) {
            Err(PoolError::NotSupported { .. }) => {
                if let Some(pos) = self.position(id) {
                    self.outstanding[pos].dropped = true;
                    self.outstanding[pos].open = false;
                }
                trace!(id, "FifoMemoryPool: interior allocation tombstoned");
                Ok(())
            }
            other => other,
        }
    }

    fn pop_front(&mut self) {
        if let Some(alloc) = self.outstanding.pop_front() {
            self.used -= alloc.len;
        }
    }

    fn pop_back(&mut self) {
        if let Some(alloc) = self.outstanding.pop_back() {
            self.used -= alloc.len;
            self.write = alloc.start;
        }
    }

    fn reclaim_dropped(&mut self) {
        while self.outstanding.front().is_some_and(|alloc| alloc.dropped) {
            self.pop_front();
        }
        while self.outstanding.back().is_some_and(|alloc| alloc.dropped) {
            self.pop_back();
        }
    }

    /// Whole blocks strictly between the write block and the reclaim block.
    fn free_blocks_beyond_cursor(&self) -> usize {
        let len = self.blocks.len();
        let w = self.write.block;
        if self.outstanding.is_empty() {
            return len - 1;
        }
        if self.used == self.total_size() {
            return 0;
        }
        let reclaim = self.reclaim_cursor();
        if reclaim.block == w {
            return if reclaim.offset > self.write.offset {
                0
            } else {
                len - 1
            };
        }
        (reclaim.block + len - w - 1) % len
    }

    fn maybe_shrink(&mut self) {
        if self.blocks.len() <= self.initial_blocks || self.free_size() <= self.shrink_threshold {
            return;
        }
        let candidates =
            (self.free_blocks_beyond_cursor() / 2).min(self.blocks.len() - self.initial_blocks);
        for _ in 0..candidates {
            let index = (self.write.block + 1) % self.blocks.len();
            self.remove_block(index);
        }
        if candidates > 0 {
            debug!(
                removed = candidates,
                blocks = self.blocks.len(),
                "FifoMemoryPool: shrunk"
            );
        }
    }

    fn remove_block(&mut self, index: usize) {
        self.blocks.remove(index);
        if self.write.block > index {
            self.write.block -= 1;
        }
        for alloc in &mut self.outstanding {
            if alloc.start.block > index {
                alloc.start.block -= 1;
            }
        }
    }

    fn locate(&self, id: u64) -> PoolResult<Allocation> {
        self.position(id)
            .map(|pos| self.outstanding[pos])
            .ok_or(PoolError::UnknownItem { id })
    }

    fn copy_in(&mut self, id: u64, at: usize, data: &[u8]) -> PoolResult<()> {
        let alloc = self.locate(id)?;
        let remaining = alloc.len.saturating_sub(at);
        if data.len() > remaining {
            return Err(PoolError::Overflow {
                requested: data.len(),
                remaining,
            });
        }
        let mut cursor = self.advance(alloc.start, at);
        let mut src = data;
        while !src.is_empty() {
            let n = (self.block_size - cursor.offset).min(src.len());
            self.blocks[cursor.block][cursor.offset..cursor.offset + n].copy_from_slice(&src[..n]);
            src = &src[n..];
            cursor = self.advance(cursor, n);
        }
        Ok(())
    }

    fn copy_out(&self, id: u64, at: usize, out: &mut [u8]) -> PoolResult<usize> {
        let alloc = self.locate(id)?;
        let count = alloc.len.saturating_sub(at).min(out.len());
        let mut cursor = self.advance(alloc.start, at);
        let mut done = 0;
        while done < count {
            let n = (self.block_size - cursor.offset).min(count - done);
            out[done..done + n]
                .copy_from_slice(&self.blocks[cursor.block][cursor.offset..cursor.offset + n]);
            done += n;
            cursor = self.advance(cursor, n);
        }
        Ok(count)
    }
}

pub(crate) struct PoolShared {
    id: u64,
    inner: Mutex<PoolInner>,
}

impl PoolShared {
    /// Lock with the spin/yield retry loop the hot path relies on.
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        let mut spins = 0u32;
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
            spins = spins.saturating_add(1);
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn grow_alloc(&self, id: u64, extra: usize) -> PoolResult<()> {
        self.lock().grow_alloc(id, extra)
    }

    pub(crate) fn seal(&self, id: u64) {
        self.lock().seal(id);
    }

    pub(crate) fn free(&self, id: u64) -> PoolResult<()> {
        self.lock().free(id)
    }

    pub(crate) fn abandon(&self, id: u64) -> PoolResult<()> {
        self.lock().abandon(id)
    }

    pub(crate) fn write_at(&self, id: u64, at: usize, data: &[u8]) -> PoolResult<()> {
        self.lock().copy_in(id, at, data)
    }

    pub(crate) fn append(&self, id: u64, at: usize, data: &[u8]) -> PoolResult<()> {
        let mut inner = self.lock();
        inner.grow_alloc(id, data.len())?;
        inner.copy_in(id, at, data)
    }

    pub(crate) fn read_at(&self, id: u64, at: usize, out: &mut [u8]) -> PoolResult<usize> {
        self.lock().copy_out(id, at, out)
    }
}

/// Growable circular block allocator.
///
/// Cloning yields another handle onto the same pool.
#[derive(Clone)]
pub struct FifoMemoryPool {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for FifoMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoMemoryPool")
            .field("id", &self.shared.id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for FifoMemoryPool {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

impl FifoMemoryPool {
    #[must_use]
    pub fn new(options: PoolOptions) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                inner: Mutex::new(PoolInner::new(options)),
            }),
        }
    }

    /// Arena identifier carried by every handle of this pool.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Allocate `size` bytes, growing the ring as needed.
    ///
    /// Spins while another thread holds the pool.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible so callers propagate allocator failures.
    pub fn alloc(&self, size: usize) -> PoolResult<PoolAllocItem> {
        let alloc = self.shared.lock().alloc(size);
        Ok(PoolAllocItem::new(Arc::clone(&self.shared), alloc.id, alloc.len))
    }

    /// Single-attempt allocation.
    ///
    /// # Errors
    ///
    /// [`PoolError::WouldBlock`] when the pool is held by another thread.
    pub fn try_alloc(&self, size: usize) -> PoolResult<PoolAllocItem> {
        let mut inner = self.shared.inner.try_lock().ok_or(PoolError::WouldBlock)?;
        let alloc = inner.alloc(size);
        Ok(PoolAllocItem::new(Arc::clone(&self.shared), alloc.id, alloc.len))
    }

    /// Release `item`, which must be the oldest or the newest allocation.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotSupported`] for an interior item, [`PoolError::ForeignItem`]
    /// for a handle from another pool.
    pub fn free(&self, item: PoolAllocItem) -> PoolResult<()> {
        if item.pool_id() != self.shared.id {
            return Err(PoolError::ForeignItem {
                id: item.id(),
                item_pool: item.pool_id(),
                pool: self.shared.id,
            });
        }
        item.release()
    }

    pub fn total_size(&self) -> usize {
        self.shared.lock().total_size()
    }

    pub fn free_size(&self) -> usize {
        self.shared.lock().free_size()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats()
    }
}
