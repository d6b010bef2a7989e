//! Memory pools for the sample path.
//!
//! Two pools live here:
//!
//! - [`FifoMemoryPool`]: a growable circular list of fixed-size byte blocks.
//!   Allocations are handed out as [`PoolAllocItem`] handles which write and
//!   read sequentially. Only the oldest or the newest outstanding allocation may
//!   be released, which keeps the free region contiguous.
//! - [`Recycler`]: a bounded free-list for wrapper objects (samples) so the hot
//!   path does not allocate per access unit.
//!
//! ## Example
//!
//! ```
//! use lyra_bufpool::{FifoMemoryPool, PoolOptions};
//!
//! let pool = FifoMemoryPool::new(PoolOptions::default().with_block_size(1024));
//! let mut item = pool.alloc(6).unwrap();
//! item.write(b"sample").unwrap();
//!
//! let mut out = [0u8; 6];
//! assert_eq!(item.read(&mut out).unwrap(), 6);
//! assert_eq!(&out, b"sample");
//! item.release().unwrap();
//! assert_eq!(pool.free_size(), pool.total_size());
//! ```

#![forbid(unsafe_code)]

mod error;
mod fifo;
mod item;
mod recycle;

pub use error::{PoolError, PoolResult};
pub use fifo::{FifoMemoryPool, PoolOptions, PoolStats};
pub use item::PoolAllocItem;
pub use recycle::{Recycler, Reuse};
