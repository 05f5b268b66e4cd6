use std::{
    alloc::Layout,
    fmt,
    mem::MaybeUninit,
    ptr::{self, NonNull},
    slice,
};

use crate::{
    backend::{Backend, RawBlock},
    error::AllocError,
};

/// Backing store of a [`crate::SparseArray`]: a slot buffer plus a parallel
/// occupancy mask of the same length.
///
/// # Safety
///
/// Implementors must hand out two slices of exactly `capacity()` elements
/// that stay at the same address for as long as the storage isn't moved,
/// and a freshly built storage must have every mask entry set to `false`.
/// The array relies on the mask to know which slots hold a value, so a
/// storage that lies about it causes reads of uninitialized memory.
pub unsafe trait SlotStorage<T> {
    /// Number of slots.
    fn capacity(&self) -> usize;

    /// Slot buffer and occupancy mask.
    fn parts(&self) -> (&[MaybeUninit<T>], &[bool]);

    /// Slot buffer and occupancy mask, mutably.
    fn parts_mut(&mut self) -> (&mut [MaybeUninit<T>], &mut [bool]);
}

/// Slots held inline, sized at compile time. Never touches a backend and
/// never resizes.
pub struct InlineStorage<T, const N: usize> {
    slots: [MaybeUninit<T>; N],
    active: [bool; N],
}

impl<T, const N: usize> InlineStorage<T, N> {
    pub fn new() -> Self {
        Self {
            slots: [const { MaybeUninit::uninit() }; N],
            active: [false; N],
        }
    }
}

impl<T, const N: usize> Default for InlineStorage<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T, const N: usize> SlotStorage<T> for InlineStorage<T, N> {
    #[inline]
    fn capacity(&self) -> usize {
        N
    }

    #[inline]
    fn parts(&self) -> (&[MaybeUninit<T>], &[bool]) {
        (&self.slots, &self.active)
    }

    #[inline]
    fn parts_mut(&mut self) -> (&mut [MaybeUninit<T>], &mut [bool]) {
        (&mut self.slots, &mut self.active)
    }
}

/// Slots in one block obtained from a [`Backend`]: the slot buffer first,
/// the mask right after it.
///
/// ```text
/// +-------+-------+-------+-----+-----+-----+
/// |   T   |   T   |   T   | b0  | b1  | b2  |
/// +-------+-------+-------+-----+-----+-----+
/// ^ slots                 ^ active
/// ```
///
/// Dropping it gives heap pages back and abandons arena ranges. It never
/// drops the values; that is the array's job.
pub struct DynStorage<'a, T> {
    backend: Backend<'a>,
    slots: NonNull<MaybeUninit<T>>,
    active: NonNull<bool>,
    capacity: usize,
    block: Option<RawBlock>,
}

impl<'a, T> DynStorage<'a, T> {
    /// Obtains room for `capacity` slots from `backend`, mask cleared.
    pub(crate) fn allocate(backend: Backend<'a>, capacity: usize) -> Result<Self, AllocError> {
        let (layout, active_offset) = Self::layout(capacity).ok_or(AllocError::CapacityOverflow)?;
        let block = backend.acquire(layout).ok_or(AllocError::OutOfMemory {
            requested: layout.size(),
        })?;

        unsafe {
            let active = block.ptr.add(active_offset).cast::<bool>();
            ptr::write_bytes(active.as_ptr(), 0, capacity);

            Ok(Self {
                backend,
                slots: block.ptr.cast(),
                active,
                capacity,
                block: Some(block),
            })
        }
    }

    /// A storage with no slots, used when the backend refused the first block.
    pub(crate) fn empty(backend: Backend<'a>) -> Self {
        Self {
            backend,
            slots: NonNull::dangling(),
            active: NonNull::dangling(),
            capacity: 0,
            block: None,
        }
    }

    fn layout(capacity: usize) -> Option<(Layout, usize)> {
        let slots = Layout::array::<T>(capacity).ok()?;
        let active = Layout::array::<bool>(capacity).ok()?;
        slots.extend(active).ok()
    }

    #[inline]
    pub(crate) fn backend(&self) -> Backend<'a> {
        self.backend
    }
}

unsafe impl<T> SlotStorage<T> for DynStorage<'_, T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn parts(&self) -> (&[MaybeUninit<T>], &[bool]) {
        unsafe {
            (
                slice::from_raw_parts(self.slots.as_ptr(), self.capacity),
                slice::from_raw_parts(self.active.as_ptr(), self.capacity),
            )
        }
    }

    #[inline]
    fn parts_mut(&mut self) -> (&mut [MaybeUninit<T>], &mut [bool]) {
        unsafe {
            (
                slice::from_raw_parts_mut(self.slots.as_ptr(), self.capacity),
                slice::from_raw_parts_mut(self.active.as_ptr(), self.capacity),
            )
        }
    }
}

impl<T> Drop for DynStorage<'_, T> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.backend.release(block);
        }
    }
}

impl<T> fmt::Debug for DynStorage<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynStorage")
            .field("capacity", &self.capacity)
            .field("arena", &self.backend.is_arena())
            .finish()
    }
}

impl<T, const N: usize> fmt::Debug for InlineStorage<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineStorage").field("capacity", &N).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arena;
    use std::mem;

    #[test]
    fn arena_storage_packs_mask_after_slots() {
        let arena = Arena::new(1024);
        let storage = DynStorage::<i32>::allocate(Backend::Arena(&arena), 2).unwrap();

        assert_eq!(storage.capacity(), 2);
        assert_eq!(arena.used(), mem::size_of::<i32>() * 2 + mem::size_of::<bool>() * 2);

        let (slots, active) = storage.parts();
        assert_eq!(slots.len(), 2);
        assert_eq!(active, &[false, false]);
    }

    #[test]
    fn heap_storage_mask_starts_clear() {
        let storage = DynStorage::<u64>::allocate(Backend::Heap, 100).unwrap();
        let (_, active) = storage.parts();
        assert!(active.iter().all(|&live| !live));
    }

    #[test]
    fn refused_block_reports_size() {
        let arena = Arena::new(16);
        let err = DynStorage::<u64>::allocate(Backend::Arena(&arena), 4).unwrap_err();
        assert_eq!(err, AllocError::OutOfMemory { requested: 36 });
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn inline_storage_has_compile_time_capacity() {
        let mut storage = InlineStorage::<String, 3>::new();
        assert_eq!(storage.capacity(), 3);
        let (slots, active) = storage.parts_mut();
        assert_eq!(slots.len(), 3);
        assert_eq!(active, &[false; 3]);
    }
}
