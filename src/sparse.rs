//! Slot-stable sparse arrays.
//!
//! A [`SparseArray`] is a fixed-capacity run of slots with a parallel
//! occupancy mask. Values keep their index until they are erased or the
//! array is explicitly compacted, so an index works as a stable handle.
//!
//! ```text
//!  index    0     1     2     3     4     5
//!        +-----+-----+-----+-----+-----+-----+
//!  slots |  9  |  .  |  3  |  7  |  .  |  .  |
//!        +-----+-----+-----+-----+-----+-----+
//!  mask     1     0     1     1     0     0
//!                                  ^ high water
//! ```
//!
//! Two flavours share every operation:
//!
//! - [`SArray`]: slots from the OS or from an [`Arena`], resizable.
//! - [`SArrayFixed`]: `N` slots stored inline, never resized.

use std::{
    fmt,
    iter::{FusedIterator, Zip},
    marker::PhantomData,
    mem::{self, MaybeUninit},
    ptr, slice,
};

use tracing::{debug, warn};

use crate::{
    arena::Arena,
    backend::Backend,
    error::AllocError,
    storage::{DynStorage, InlineStorage, SlotStorage},
};

/// Sparse array over OS pages or an arena, resizable.
pub type SArray<'a, T> = SparseArray<T, DynStorage<'a, T>>;

/// Sparse array with `N` inline slots.
pub type SArrayFixed<T, const N: usize> = SparseArray<T, InlineStorage<T, N>>;

/// Capacity-bounded container with per-slot occupancy and stable indices.
///
/// Invariants:
/// - `used() <= high_water() <= size()`
/// - no slot at or past `high_water()` is occupied
/// - `high_water() - 1` is occupied whenever `high_water() > 0`
///
/// Every operation that can run out of room reports it with `None` (or an
/// [`AllocError`] for resizes) and leaves the array untouched.
pub struct SparseArray<T, S: SlotStorage<T>> {
    storage: S,
    used: usize,
    high_water: usize,
    marker: PhantomData<T>,
}

impl<T> SparseArray<T, DynStorage<'static, T>> {
    /// Creates an array of `capacity` slots on pages owned by the array.
    pub fn new(capacity: usize) -> Self {
        Self::with_backend(Backend::Heap, capacity)
    }
}

impl<'a, T> SparseArray<T, DynStorage<'a, T>> {
    /// Creates an array of `capacity` slots carved from `arena`.
    pub fn with_arena(arena: &'a Arena<'a>, capacity: usize) -> Self {
        Self::with_backend(Backend::Arena(arena), capacity)
    }

    fn with_backend(backend: Backend<'a>, capacity: usize) -> Self {
        let storage = DynStorage::allocate(backend, capacity).unwrap_or_else(|err| {
            warn!(%err, capacity, "sparse array created without storage");
            DynStorage::empty(backend)
        });

        Self::from_storage(storage)
    }

    /// Changes the capacity to `new_size` slots. Compacts first.
    ///
    /// Arena-backed arrays can only grow: a bigger range is carved from
    /// the arena, the values move over, and the old range is abandoned
    /// (it stays charged to the arena until the arena is reset).
    /// Heap-backed arrays can also shrink, dropping the values that no
    /// longer fit.
    ///
    /// If the new storage can't be obtained nothing changes, not even the
    /// slot positions.
    pub fn resize(&mut self, new_size: usize) -> Result<(), AllocError> {
        let capacity = self.storage.capacity();
        let backend = self.storage.backend();

        if backend.is_arena() && new_size < capacity {
            return Err(AllocError::ShrinkUnsupported {
                capacity,
                requested: new_size,
            });
        }

        if new_size == capacity {
            self.compact();
            return Ok(());
        }

        let mut fresh = DynStorage::allocate(backend, new_size)?;

        self.compact();
        self.truncate(new_size);

        let keep = self.used;
        let (src, _) = self.storage.parts();
        let (dst, mask) = fresh.parts_mut();
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr(), keep);
        }
        mask[..keep].fill(true);

        // The old storage still has its mask set, but it is dropped as raw
        // memory: the values now belong to `fresh`.
        self.storage = fresh;

        debug!(from = capacity, to = new_size, used = keep, arena = backend.is_arena(), "sparse array resized");

        Ok(())
    }

    /// Shrinks the capacity to `max(used, 1)`. Heap-backed arrays only.
    pub fn shrink_to_fit(&mut self) -> Result<(), AllocError> {
        self.resize(self.used.max(1))
    }

    /// Whether the slots come from an arena.
    pub fn is_arena_backed(&self) -> bool {
        self.storage.backend().is_arena()
    }

    /// Drops the values of a compacted array from index `len` on.
    fn truncate(&mut self, len: usize) {
        while self.used > len {
            self.pop();
        }
    }
}

impl<T, const N: usize> SparseArray<T, InlineStorage<T, N>> {
    /// Creates an empty array with `N` inline slots.
    pub fn new() -> Self {
        Self::from_storage(InlineStorage::new())
    }
}

impl<T, const N: usize> Default for SparseArray<T, InlineStorage<T, N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S: SlotStorage<T>> SparseArray<T, S> {
    /// Wraps a storage whose mask is entirely clear.
    pub(crate) fn from_storage(storage: S) -> Self {
        Self {
            storage,
            used: 0,
            high_water: 0,
            marker: PhantomData,
        }
    }

    /// Total number of slots.
    #[inline]
    pub fn size(&self) -> usize {
        self.storage.capacity()
    }

    /// Number of occupied slots.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// One past the highest occupied index since the last compaction.
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.used == self.storage.capacity()
    }

    /// Writes `value` into the free slot `pos` and marks it occupied.
    fn occupy(&mut self, pos: usize, value: T) -> &mut T {
        let (slots, active) = self.storage.parts_mut();
        debug_assert!(!active[pos]);

        active[pos] = true;
        self.used += 1;
        self.high_water = self.high_water.max(pos + 1);

        slots[pos].write(value)
    }

    /// Appends `value` at the high-water mark.
    ///
    /// `None` when the array is full, or when the high-water mark already
    /// sits at the end and only interior gaps are left (use [`fill`] or
    /// [`compact`] for those).
    ///
    /// [`fill`]: SparseArray::fill
    /// [`compact`]: SparseArray::compact
    pub fn push(&mut self, value: T) -> Option<&mut T> {
        self.push_with(|| value)
    }

    /// Like [`SparseArray::push`], building the value only once a slot is secured.
    pub fn push_with(&mut self, f: impl FnOnce() -> T) -> Option<&mut T> {
        // Also covers `is_full`, since `used <= high_water`.
        if self.high_water == self.storage.capacity() {
            return None;
        }

        let pos = self.high_water;
        Some(self.occupy(pos, f()))
    }

    /// Puts `value` into the lowest free slot. O(capacity) scan.
    pub fn fill(&mut self, value: T) -> Option<&mut T> {
        self.fill_with(|| value)
    }

    /// Like [`SparseArray::fill`], building the value only once a slot is secured.
    pub fn fill_with(&mut self, f: impl FnOnce() -> T) -> Option<&mut T> {
        if self.is_full() {
            return None;
        }

        let (_, active) = self.storage.parts();
        let pos = active.iter().position(|&live| !live)?;
        Some(self.occupy(pos, f()))
    }

    /// Removes and returns the value just below the high-water mark.
    pub fn pop(&mut self) -> Option<T> {
        let last = self.high_water.checked_sub(1)?;
        self.remove(last)
    }

    /// Removes and returns the value at `pos`. Other values don't move.
    pub fn remove(&mut self, pos: usize) -> Option<T> {
        if pos >= self.high_water {
            return None;
        }

        let (slots, active) = self.storage.parts_mut();
        if !active[pos] {
            return None;
        }

        active[pos] = false;
        self.used -= 1;
        let value = unsafe { slots[pos].assume_init_read() };

        if pos + 1 == self.high_water {
            self.high_water = active[..pos].iter().rposition(|&live| live).map_or(0, |i| i + 1);
        }

        Some(value)
    }

    /// Drops the value at `pos`. Returns whether there was one.
    pub fn erase(&mut self, pos: usize) -> bool {
        self.remove(pos).is_some()
    }

    /// Drops the value `ptr` points at. Pointers that don't address one of
    /// this array's slots are ignored.
    pub fn erase_ptr(&mut self, ptr: *const T) -> bool {
        match self.position_of(ptr) {
            Some(pos) => self.erase(pos),
            None => false,
        }
    }

    /// Index of the slot `ptr` points at, if it is one of ours.
    pub fn position_of(&self, ptr: *const T) -> Option<usize> {
        let stride = mem::size_of::<T>();
        if stride == 0 {
            return None;
        }

        let (slots, _) = self.storage.parts();
        let distance = (ptr as usize).checked_sub(slots.as_ptr() as usize)?;
        let pos = distance / stride;

        (distance % stride == 0 && pos < slots.len()).then_some(pos)
    }

    /// The value at `pos`, or `None` if `pos` is out of range or empty.
    pub fn at(&self, pos: usize) -> Option<&T> {
        let (slots, active) = self.storage.parts();
        if !*active.get(pos)? {
            return None;
        }
        Some(unsafe { slots[pos].assume_init_ref() })
    }

    /// Mutable counterpart of [`SparseArray::at`].
    pub fn at_mut(&mut self, pos: usize) -> Option<&mut T> {
        let (slots, active) = self.storage.parts_mut();
        if !*active.get(pos)? {
            return None;
        }
        Some(unsafe { slots[pos].assume_init_mut() })
    }

    /// Lowest-index value.
    pub fn first(&self) -> Option<&T> {
        self.iter().next()
    }

    /// Highest-index value.
    pub fn last(&self) -> Option<&T> {
        self.iter().next_back()
    }

    /// Compacts, then shifts `[pos, used)` right by `count` slots leaving
    /// `[pos, pos + count)` empty. Refuses (without compacting) if `pos`
    /// is past the dense range or the values wouldn't fit.
    fn open_gap(&mut self, pos: usize, count: usize) -> bool {
        if count == 0 || pos > self.used || self.storage.capacity() - self.used < count {
            return false;
        }

        self.compact();

        let used = self.used;
        let (slots, active) = self.storage.parts_mut();
        unsafe {
            let base = slots.as_mut_ptr();
            ptr::copy(base.add(pos), base.add(pos + count), used - pos);
        }
        active[used..used + count].fill(true);
        active[pos..pos + count].fill(false);
        self.high_water = used + count;

        true
    }

    /// Inserts `count` copies of `value` at `pos`, shifting later values
    /// right. Returns the first inserted value.
    pub fn insert(&mut self, pos: usize, count: usize, value: T) -> Option<&mut T>
    where
        T: Clone,
    {
        if !self.open_gap(pos, count) {
            return None;
        }

        for i in 1..count {
            self.occupy(pos + i, value.clone());
        }
        Some(self.occupy(pos, value))
    }

    /// Inserts clones of `values` at `pos`, in order.
    pub fn insert_slice(&mut self, pos: usize, values: &[T]) -> Option<&mut T>
    where
        T: Clone,
    {
        if !self.open_gap(pos, values.len()) {
            return None;
        }

        for (i, value) in values.iter().enumerate() {
            self.occupy(pos + i, value.clone());
        }
        self.at_mut(pos)
    }

    /// Inserts one value built by `f` at `pos`.
    pub fn insert_with(&mut self, pos: usize, f: impl FnOnce() -> T) -> Option<&mut T> {
        if !self.open_gap(pos, 1) {
            return None;
        }

        Some(self.occupy(pos, f()))
    }

    /// Puts `value` at `pos`, dropping whatever was there. Nothing else moves.
    pub fn replace(&mut self, pos: usize, value: T) -> Option<&mut T> {
        self.replace_with(pos, || value)
    }

    /// Like [`SparseArray::replace`] with a lazily built value.
    pub fn replace_with(&mut self, pos: usize, f: impl FnOnce() -> T) -> Option<&mut T> {
        let (_, active) = self.storage.parts();
        let occupied = *active.get(pos)?;

        if !occupied {
            return Some(self.occupy(pos, f()));
        }

        let (slots, _) = self.storage.parts_mut();
        let slot = unsafe { slots[pos].assume_init_mut() };
        *slot = f();
        Some(slot)
    }

    /// Slides every value down into `[0, used)`, keeping their order.
    /// O(high water). Calling it twice is the same as calling it once.
    pub fn compact(&mut self) {
        let (slots, active) = self.storage.parts_mut();
        let mut dense = 0;

        for pos in 0..self.high_water {
            if !active[pos] {
                continue;
            }
            if pos != dense {
                slots.swap(pos, dense);
                active[dense] = true;
                active[pos] = false;
            }
            dense += 1;
        }

        self.high_water = dense;
    }

    /// Drops every value and returns to the freshly built state.
    pub fn reset(&mut self) {
        let (slots, active) = self.storage.parts_mut();

        for pos in 0..self.high_water {
            if active[pos] {
                active[pos] = false;
                if mem::needs_drop::<T>() {
                    unsafe { slots[pos].assume_init_drop() };
                }
            }
        }

        self.used = 0;
        self.high_water = 0;
    }

    /// Erases every value for which `keep` returns `false`. Survivors keep
    /// their indices.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let mut pos = 0;
        while pos < self.high_water {
            if self.at(pos).is_some_and(|value| !keep(value)) {
                self.erase(pos);
            }
            pos += 1;
        }
    }

    /// Replaces the contents with clones of `values`, stopping silently
    /// once the array is full. Returns how many were taken.
    pub fn assign_slice(&mut self, values: &[T]) -> usize
    where
        T: Clone,
    {
        self.assign_iter(values.iter().cloned())
    }

    /// Replaces the contents with clones of another array's values.
    pub fn assign_from<S2: SlotStorage<T>>(&mut self, other: &SparseArray<T, S2>) -> usize
    where
        T: Clone,
    {
        self.assign_iter(other.iter().cloned())
    }

    /// Replaces the contents with the items of `values`, stopping silently
    /// once the array is full. Returns how many were taken.
    pub fn assign_iter(&mut self, values: impl IntoIterator<Item = T>) -> usize {
        self.reset();

        let mut taken = 0;
        for value in values {
            if self.is_full() {
                break;
            }
            self.push(value);
            taken += 1;
        }
        taken
    }

    /// Occupied values in index order. Double-ended.
    pub fn iter(&self) -> Iter<'_, T> {
        let (slots, active) = self.storage.parts();
        Iter {
            inner: slots[..self.high_water].iter().zip(active[..self.high_water].iter()),
            remaining: self.used,
        }
    }

    /// Mutable counterpart of [`SparseArray::iter`].
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        let high_water = self.high_water;
        let remaining = self.used;
        let (slots, active) = self.storage.parts_mut();
        IterMut {
            inner: slots[..high_water].iter_mut().zip(active[..high_water].iter()),
            remaining,
        }
    }

    /// Occupied values with their indices.
    pub fn iter_indexed(&self) -> impl DoubleEndedIterator<Item = (usize, &T)> + '_ {
        let (slots, active) = self.storage.parts();
        slots[..self.high_water]
            .iter()
            .zip(&active[..self.high_water])
            .enumerate()
            .filter(|(_, (_, live))| **live)
            .map(|(pos, (slot, _))| (pos, unsafe { slot.assume_init_ref() }))
    }
}

impl<T, S: SlotStorage<T>> Drop for SparseArray<T, S> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            self.reset();
        }
    }
}

impl<T: fmt::Debug, S: SlotStorage<T>> fmt::Debug for SparseArray<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter_indexed()).finish()
    }
}

/// Iterator over the occupied slots of a [`SparseArray`].
pub struct Iter<'a, T> {
    inner: Zip<slice::Iter<'a, MaybeUninit<T>>, slice::Iter<'a, bool>>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (slot, &live) = self.inner.next()?;
            if live {
                self.remaining -= 1;
                return Some(unsafe { slot.assume_init_ref() });
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let (slot, &live) = self.inner.next_back()?;
            if live {
                self.remaining -= 1;
                return Some(unsafe { slot.assume_init_ref() });
            }
        }
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

/// Mutable iterator over the occupied slots of a [`SparseArray`].
pub struct IterMut<'a, T> {
    inner: Zip<slice::IterMut<'a, MaybeUninit<T>>, slice::Iter<'a, bool>>,
    remaining: usize,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (slot, &live) = self.inner.next()?;
            if live {
                self.remaining -= 1;
                return Some(unsafe { slot.assume_init_mut() });
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for IterMut<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let (slot, &live) = self.inner.next_back()?;
            if live {
                self.remaining -= 1;
                return Some(unsafe { slot.assume_init_mut() });
            }
        }
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

impl<'a, T, S: SlotStorage<T>> IntoIterator for &'a SparseArray<T, S> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, S: SlotStorage<T>> IntoIterator for &'a mut SparseArray<T, S> {
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}
