use std::{fmt, sync::Arc};

use tracing::warn;

use crate::{
    error::{PoolError, PoolResult},
    fifo::PoolShared,
};

/// Handle onto one allocation of a [`FifoMemoryPool`](crate::FifoMemoryPool).
///
/// The handle carries the arena id and the allocation id, never a pointer.
/// Writes append sequentially, reads consume sequentially. Dropping an item that
/// was not released frees it, or marks it for reclaim once its neighbours are
/// gone; prefer [`PoolAllocItem::release`] to observe errors.
pub struct PoolAllocItem {
    shared: Arc<PoolShared>,
    id: u64,
    len: usize,
    written: usize,
    read: usize,
    released: bool,
}

impl fmt::Debug for PoolAllocItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocItem")
            .field("pool", &self.shared.id())
            .field("id", &self.id)
            .field("len", &self.len)
            .field("written", &self.written)
            .field("read", &self.read)
            .finish()
    }
}

impl PoolAllocItem {
    pub(crate) fn new(shared: Arc<PoolShared>, id: u64, len: usize) -> Self {
        Self {
            shared,
            id,
            len,
            written: 0,
            read: 0,
            released: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool_id(&self) -> u64 {
        self.shared.id()
    }

    /// Allocated length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Bytes still writable without growing.
    pub fn remaining(&self) -> usize {
        self.len - self.written
    }

    /// Append `data` inside the allocated length.
    ///
    /// # Errors
    ///
    /// [`PoolError::Overflow`] if `data` does not fit.
    pub fn write(&mut self, data: &[u8]) -> PoolResult<()> {
        self.shared.write_at(self.id, self.written, data)?;
        self.written += data.len();
        Ok(())
    }

    /// Extend the allocation by `extra` bytes.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotGrowable`] unless this is the newest open allocation.
    pub fn grow(&mut self, extra: usize) -> PoolResult<()> {
        self.shared.grow_alloc(self.id, extra)?;
        self.len += extra;
        Ok(())
    }

    /// Grow by `data.len()` and write it, in one locked step.
    ///
    /// # Errors
    ///
    /// Same as [`PoolAllocItem::grow`].
    pub fn append(&mut self, data: &[u8]) -> PoolResult<()> {
        if data.len() <= self.remaining() {
            return self.write(data);
        }
        let extra = data.len() - self.remaining();
        let (fits, rest) = data.split_at(self.remaining());
        self.write(fits)?;
        self.shared.append(self.id, self.written, rest)?;
        self.len += extra;
        self.written += rest.len();
        Ok(())
    }

    /// Forbid further growth.
    pub fn seal(&mut self) {
        self.shared.seal(self.id);
    }

    /// Read the next bytes into `out`, returning how many were copied.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownItem`] if the allocation was released underneath.
    pub fn read(&mut self, out: &mut [u8]) -> PoolResult<usize> {
        let limit = (self.written - self.read).min(out.len());
        let n = self.shared.read_at(self.id, self.read, &mut out[..limit])?;
        self.read += n;
        Ok(n)
    }

    /// Copy all written bytes into `out` without moving the read position.
    ///
    /// # Errors
    ///
    /// Same as [`PoolAllocItem::read`].
    pub fn copy_to(&self, out: &mut Vec<u8>) -> PoolResult<()> {
        let start = out.len();
        out.resize(start + self.written, 0);
        self.shared.read_at(self.id, 0, &mut out[start..])?;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.read = 0;
    }

    /// Give the bytes back to the pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::NotSupported`] when the item is neither the oldest nor
    /// the newest allocation. The item is still reclaimed once its neighbours
    /// are gone.
    pub fn release(mut self) -> PoolResult<()> {
        let result = self.shared.free(self.id);
        // Interior items fall through to the tombstone in `Drop`.
        self.released = !matches!(result, Err(PoolError::NotSupported { .. }));
        result
    }

    /// Like [`PoolAllocItem::release`], but hands the item back on failure so
    /// the caller can retry once its neighbours are gone.
    ///
    /// # Errors
    ///
    /// The pool error together with the still-live item.
    pub fn try_release(mut self) -> Result<(), (PoolError, Self)> {
        match self.shared.free(self.id) {
            Ok(()) => {
                self.released = true;
                Ok(())
            }
            Err(error) => Err((error, self)),
        }
    }
}

impl Drop for PoolAllocItem {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self.shared.abandon(self.id) {
            warn!(id = self.id, %error, "PoolAllocItem: dropped without release");
        }
    }
}

impl PartialEq for PoolAllocItem {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id() == other.shared.id() && self.id == other.id
    }
}
