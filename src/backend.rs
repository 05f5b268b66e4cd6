use std::{alloc::Layout, ptr::{self, NonNull}};

use crate::{arena::Arena, kernel, utils::align};

/// A byte range handed out by a [`Backend`].
///
/// `mapped` is the length of the OS mapping behind `ptr`, or 0 when there
/// is nothing to give back (arena ranges and zero-sized requests).
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBlock {
    pub ptr: NonNull<u8>,
    pub mapped: usize,
}

/// Where a pool or sparse array gets its storage from.
///
/// ```text
///   Heap                      Arena(&parent)
///    |                            |
///    v                            v
/// +--------+               +---------------------------+
/// | kernel | pages, owned  | parent bump range, shared |
/// +--------+               +---------------------------+
/// ```
///
/// Heap blocks are owned outright and returned on release. Arena blocks are
/// borrowed from the parent and release is a no-op: the root arena frees
/// them all at once.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Backend<'a> {
    /// Pages requested straight from the OS.
    Heap,
    /// Ranges carved from a parent arena.
    Arena(&'a Arena<'a>),
}

impl<'a> Backend<'a> {
    /// Obtain a block satisfying `layout`, or `None` if the backend is out of room.
    pub(crate) fn acquire(&self, layout: Layout) -> Option<RawBlock> {
        match self {
            Backend::Heap => heap_acquire(layout),
            Backend::Arena(arena) => arena
                .allocate_raw(layout.size(), layout.align())
                .map(|ptr| RawBlock { ptr, mapped: 0 }),
        }
    }

    /// Give a block back. Arena blocks are abandoned.
    pub(crate) fn release(&self, block: RawBlock) {
        if let Backend::Heap = self {
            heap_release(block);
        }
    }

    /// Whether storage comes from an arena (and therefore can't shrink).
    #[inline]
    pub(crate) fn is_arena(&self) -> bool {
        matches!(self, Backend::Arena(_))
    }
}

/// Requests whole pages from the kernel for `layout`.
///
/// Zero-sized layouts never reach the OS: they get a dangling pointer with
/// the right alignment. Alignments beyond the page size can't be honoured
/// by a fresh mapping and are refused.
pub(crate) fn heap_acquire(layout: Layout) -> Option<RawBlock> {
    if layout.size() == 0 {
        let ptr = NonNull::new(ptr::without_provenance_mut::<u8>(layout.align()))?;
        return Some(RawBlock { ptr, mapped: 0 });
    }

    let page = kernel::page_size();
    if layout.align() > page {
        return None;
    }

    if layout.size() > usize::MAX - page {
        return None;
    }
    let len = align(layout.size(), page);
    let ptr = unsafe { kernel::request_memory(len)? };

    Some(RawBlock { ptr, mapped: len })
}

/// Returns a block obtained from [`heap_acquire`] to the kernel.
pub(crate) fn heap_release(block: RawBlock) {
    if block.mapped > 0 {
        unsafe { kernel::return_memory(block.ptr.as_ptr(), block.mapped) }
    }
}
