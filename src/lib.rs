//! Arena, pool and sparse-array primitives for code that wants to stay off
//! the general-purpose heap.
//!
//! ```text
//!                    +----------------+
//!                    |   Arena (root) | <- pages from the kernel
//!                    +----------------+
//!                   /        |         \
//!        +-------------+ +--------+ +------------+
//!        | Arena child | | Pool<T>| | SArray<T>  |   <- ranges carved from the root
//!        +-------------+ +--------+ +------------+
//! ```
//!
//! - [`Arena`]: bump allocator over one byte buffer. May be nested inside
//!   another arena; only the root owns memory.
//! - [`Pool`]: fixed-size slots with O(1) allocate/deallocate, growable
//!   without moving live values.
//! - [`SArray`] / [`SArrayFixed`]: slot-stable sparse arrays with
//!   occupancy tracking and explicit compaction.
//!
//! Pools and arrays can also own their pages directly instead of borrowing
//! them from an arena.
//!
//! Nothing here is thread-safe. Exhaustion is never fatal: allocation
//! calls return `None`, resize and grow calls return an [`AllocError`].

mod arena;
mod backend;
mod error;
mod freelist;
mod kernel;
mod list;
mod pool;
mod sparse;
mod storage;
pub mod utils;

pub use arena::Arena;
pub use error::AllocError;
pub use pool::{Pool, PoolPtr};
pub use sparse::{Iter, IterMut, SArray, SArrayFixed, SparseArray};
pub use storage::{DynStorage, InlineStorage, SlotStorage};
