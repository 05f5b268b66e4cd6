use std::{alloc::Layout, cell::Cell, fmt, mem::MaybeUninit, ptr::NonNull, slice};

use tracing::{debug, trace, warn};

use crate::{
    backend::{self, RawBlock},
    error::AllocError,
    utils::{padding_for, DEFAULT_ALIGN},
};

/// A bump-pointer allocator over one contiguous byte buffer.
///
/// A root arena (built with [`Arena::new`]) owns its buffer and gives it
/// back to the OS when dropped. A child arena (built with
/// [`Arena::with_parent`]) carves its buffer out of the parent and never
/// frees it: the whole tree lives exactly as long as the root.
///
/// ```text
///  root  +--------------------------------------------------------+
///        | str | pool slots | child +---------------------+ |     |
///        |     |            |       | child's own bumps.. | |     |
///        +--------------------------------------------------------+
///                                                         ^ offset
/// ```
///
/// Allocation goes through `&self`, so any number of values can be live at
/// once. [`Arena::reset`] and [`Arena::resize`] need `&mut self`, which means
/// nothing allocated from the arena (and no child, pool or array borrowing
/// it) can still be around when they run.
///
/// Values placed in an arena are never dropped. Types that own resources
/// must be cleaned up by the caller before the arena is reset or dropped.
pub struct Arena<'a> {
    /// Arena this one was carved from. `None` for a root.
    parent: Option<&'a Arena<'a>>,
    /// Start of the usable range. `None` if no storage could be obtained.
    buffer: Option<NonNull<u8>>,
    /// Size of the usable range in bytes.
    capacity: usize,
    /// Bump cursor, always `<= capacity`.
    offset: Cell<usize>,
    /// OS mapping owned by a root arena.
    owned: Option<RawBlock>,
}

impl Arena<'static> {
    /// Creates a root arena of `size` bytes backed by fresh OS pages.
    ///
    /// If the pages can't be obtained the arena is still created, but
    /// every allocation from it fails.
    pub fn new(size: usize) -> Self {
        let owned = Self::map(size);
        if owned.is_none() {
            warn!(size, "root arena could not obtain storage");
        } else {
            debug!(size, "root arena created");
        }

        Self {
            parent: None,
            buffer: owned.map(|block| block.ptr),
            capacity: size,
            offset: Cell::new(0),
            owned,
        }
    }
}

impl<'a> Arena<'a> {
    /// Creates a child arena of `size` bytes carved from `parent`.
    ///
    /// The parent's `used()` grows by exactly `size`. When the parent is
    /// out of room the child ends up without a buffer and all of its
    /// allocations fail.
    pub fn with_parent(parent: &'a Arena<'a>, size: usize) -> Self {
        let buffer = parent.allocate_raw(size, 1);
        if buffer.is_none() {
            warn!(size, parent_remaining = parent.remaining(), "child arena left without storage");
        } else {
            debug!(size, "child arena created");
        }

        Self {
            parent: Some(parent),
            buffer,
            capacity: size,
            offset: Cell::new(0),
            owned: None,
        }
    }

    fn map(size: usize) -> Option<RawBlock> {
        let layout = Layout::from_size_align(size, DEFAULT_ALIGN).ok()?;
        backend::heap_acquire(layout)
    }

    /// Reserves `size` bytes whose start is a multiple of `align`.
    ///
    /// This is the single choke point every other allocation goes through.
    /// Returns `None` when the request (including alignment padding) does
    /// not fit, when `align` is not a power of two, or when the arena has
    /// no buffer. A failed call leaves `used()` untouched.
    pub fn allocate_raw(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !align.is_power_of_two() {
            return None;
        }
        let buffer = self.buffer?;

        let offset = self.offset.get();
        let padding = padding_for((buffer.as_ptr() as usize).wrapping_add(offset), align);

        let end = offset.checked_add(padding)?.checked_add(size)?;
        if end > self.capacity {
            trace!(size, align, used = offset, capacity = self.capacity, "arena exhausted");
            return None;
        }

        self.offset.set(end);

        // SAFETY: `offset + padding <= end <= capacity`, so the result stays
        // inside (or one past the end of) the buffer.
        Some(unsafe { buffer.add(offset + padding) })
    }

    /// Reserves room for `count` values of `T`, left uninitialized.
    #[allow(clippy::mut_from_ref)]
    pub fn allocate<T>(&self, count: usize) -> Option<&mut [MaybeUninit<T>]> {
        let layout = Layout::array::<T>(count).ok()?;
        let ptr = self.allocate_raw(layout.size(), layout.align())?;

        // SAFETY: the range is freshly reserved, correctly aligned, and never
        // handed out again until `reset`/`resize`, which need `&mut self`.
        Some(unsafe { slice::from_raw_parts_mut(ptr.cast::<MaybeUninit<T>>().as_ptr(), count) })
    }

    /// Moves `value` into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn allocate_new<T>(&self, value: T) -> Option<&mut T> {
        self.allocate_with(|| value)
    }

    /// Builds a value in place. `f` only runs if the space was reserved.
    #[allow(clippy::mut_from_ref)]
    pub fn allocate_with<T>(&self, f: impl FnOnce() -> T) -> Option<&mut T> {
        let layout = Layout::new::<T>();
        let ptr = self.allocate_raw(layout.size(), layout.align())?.cast::<T>();

        unsafe {
            ptr.as_ptr().write(f());
            Some(&mut *ptr.as_ptr())
        }
    }

    /// Moves the cursor back to the start. O(1), runs no destructors.
    #[inline]
    pub fn reset(&mut self) {
        self.offset.set(0);
    }

    /// Swaps the buffer for a fresh one of `new_size` bytes and resets.
    ///
    /// A child asks its parent for the new range and abandons the old one
    /// (it stays charged to the parent until the parent is reset). A root
    /// maps new pages and returns the old ones. On failure the arena is
    /// left untouched.
    pub fn resize(&mut self, new_size: usize) -> Result<(), AllocError> {
        let out_of_memory = AllocError::OutOfMemory { requested: new_size };

        match self.parent {
            Some(parent) => {
                let buffer = parent.allocate_raw(new_size, 1).ok_or(out_of_memory)?;
                self.buffer = Some(buffer);
            }
            None => {
                let block = Self::map(new_size).ok_or(out_of_memory)?;
                if let Some(old) = self.owned.replace(block) {
                    backend::heap_release(old);
                }
                self.buffer = Some(block.ptr);
            }
        }

        debug!(from = self.capacity, to = new_size, child = self.is_child(), "arena resized");

        self.capacity = new_size;
        self.offset.set(0);

        Ok(())
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed so far, padding included.
    #[inline]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Bytes still available before any alignment padding.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    /// Whether this arena was carved from a parent.
    #[inline]
    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Whether the arena obtained a buffer at all.
    #[inline]
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        // Children never own storage, only a root has a mapping here.
        if let Some(block) = self.owned.take() {
            backend::heap_release(block);
        }
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("size", &self.capacity)
            .field("used", &self.used())
            .field("child", &self.is_child())
            .field("has_buffer", &self.has_buffer())
            .finish()
    }
}
