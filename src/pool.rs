use std::{
    alloc::Layout,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem::{self, MaybeUninit},
    ptr::NonNull,
};

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::{
    arena::Arena,
    backend::{Backend, RawBlock},
    error::AllocError,
    freelist::FreeList,
    list::{List, Node},
};

/// Payload of a slot. `live` is the per-slot liveness flag that makes
/// double frees and stale pointers detectable.
struct Entry<T> {
    live: bool,
    value: MaybeUninit<T>,
}

/// A pool slot: the list links followed by the payload.
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        | -> Links (free chain or used list)
/// |        prev         |        |
/// +---------------------+ <------+
/// |     live (1b)       |
/// +---------------------+ <------- PoolPtr points here
/// |       value         |
/// +---------------------+
/// ```
type Slot<T> = Node<Entry<T>>;

/// One backing buffer. Every `grow` adds one; they are never moved.
struct PoolBuffer<T> {
    slots: NonNull<Slot<T>>,
    count: usize,
    block: RawBlock,
}

/// Address of a value living in a [`Pool`].
///
/// Stays valid until the value is deallocated or the pool is reset or
/// dropped. Compare two of them to check slot identity. Reading through it
/// goes through [`Pool::get`], which checks it still points at a live slot.
pub struct PoolPtr<T> {
    ptr: NonNull<T>,
}

impl<T> PoolPtr<T> {
    /// Raw address of the value.
    #[inline]
    pub fn as_ptr(self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> Clone for PoolPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolPtr<T> {}

impl<T> PartialEq for PoolPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for PoolPtr<T> {}

impl<T> Hash for PoolPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl<T> fmt::Debug for PoolPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolPtr").field(&self.ptr).finish()
    }
}

/// Fixed-size slot allocator with O(1) allocate and deallocate.
///
/// Slots come from one or more backing buffers, taken either from an
/// [`Arena`] or straight from the OS. Unused slots sit on a free chain,
/// live ones on a doubly-linked used list, so freeing in any order is O(1).
///
/// ```text
/// buffers[0]                         buffers[1] (after grow)
/// +------+------+------+             +------+------+------+------+
/// | live | free | live |             | free | free | live | free |
/// +------+------+------+             +------+------+------+------+
/// ```
///
/// Growing appends a new buffer instead of reallocating, so a value's
/// address never changes while it is live.
pub struct Pool<'a, T> {
    backend: Backend<'a>,
    buffers: SmallVec<[PoolBuffer<T>; 4]>,
    free: FreeList<Entry<T>>,
    used: List<Entry<T>>,
    marker: PhantomData<T>,
}

impl<T> Pool<'static, T> {
    /// Creates a pool of `pool_size` slots on pages owned by the pool.
    pub fn new(pool_size: usize) -> Self {
        Self::with_backend(Backend::Heap, pool_size)
    }
}

impl<'a, T> Pool<'a, T> {
    /// Creates a pool of `pool_size` slots carved from `arena`.
    pub fn with_arena(arena: &'a Arena<'a>, pool_size: usize) -> Self {
        Self::with_backend(Backend::Arena(arena), pool_size)
    }

    /// If the backend can't supply the first buffer the pool starts out
    /// with no slots, and every allocation fails until a `grow` succeeds.
    fn with_backend(backend: Backend<'a>, pool_size: usize) -> Self {
        let mut pool = Self {
            backend,
            buffers: SmallVec::new(),
            free: FreeList::new(),
            used: List::new(),
            marker: PhantomData,
        };

        if let Err(err) = pool.grow(pool_size) {
            warn!(%err, pool_size, "pool created without storage");
        }

        pool
    }

    /// Moves `value` into a free slot. `None` if the pool is full.
    pub fn allocate(&mut self, value: T) -> Option<PoolPtr<T>> {
        self.allocate_with(|| value)
    }

    /// Builds a value directly in a free slot. `f` only runs if a slot is
    /// available.
    pub fn allocate_with(&mut self, f: impl FnOnce() -> T) -> Option<PoolPtr<T>> {
        if self.free.is_empty() {
            return None;
        }
        let value = f();
        let mut slot = self.free.pop()?;

        unsafe {
            let entry = &mut slot.as_mut().data;
            let ptr = NonNull::from(entry.value.write(value));
            entry.live = true;

            self.used.push_front(slot);

            Some(PoolPtr { ptr })
        }
    }

    /// Drops the value at `ptr` and returns its slot to the free chain.
    ///
    /// `None`, a pointer that was already deallocated, and a pointer that
    /// doesn't belong to this pool are all ignored. Returns whether a value
    /// was actually released.
    pub fn deallocate(&mut self, ptr: impl Into<Option<PoolPtr<T>>>) -> bool {
        match ptr.into() {
            Some(ptr) => self.take(ptr).is_some(),
            None => false,
        }
    }

    /// Like [`Pool::deallocate`] but hands the value back instead of dropping it.
    pub fn take(&mut self, ptr: PoolPtr<T>) -> Option<T> {
        let mut slot = self.live_slot(ptr)?;

        unsafe {
            self.used.remove(slot);

            let entry = &mut slot.as_mut().data;
            entry.live = false;
            let value = entry.value.assume_init_read();

            self.free.push(slot);

            Some(value)
        }
    }

    /// Shared access to a live value.
    pub fn get(&self, ptr: PoolPtr<T>) -> Option<&T> {
        let slot = self.live_slot(ptr)?;
        unsafe { Some((*slot.as_ptr()).data.value.assume_init_ref()) }
    }

    /// Exclusive access to a live value.
    pub fn get_mut(&mut self, ptr: PoolPtr<T>) -> Option<&mut T> {
        let slot = self.live_slot(ptr)?;
        unsafe { Some((*slot.as_ptr()).data.value.assume_init_mut()) }
    }

    /// Whether `ptr` points at a live value of this pool.
    pub fn contains(&self, ptr: PoolPtr<T>) -> bool {
        self.live_slot(ptr).is_some()
    }

    /// Maps a value address back to its slot by buffer/index arithmetic.
    /// Only addresses that land exactly on a slot's value in one of our
    /// buffers, and whose slot is live, are accepted.
    fn live_slot(&self, ptr: PoolPtr<T>) -> Option<NonNull<Slot<T>>> {
        let value_offset = mem::offset_of!(Slot<T>, data) + mem::offset_of!(Entry<T>, value);
        let stride = mem::size_of::<Slot<T>>();
        let addr = ptr.ptr.as_ptr() as usize;

        let slot = self.buffers.iter().find_map(|buffer| {
            let first = (buffer.slots.as_ptr() as usize).checked_add(value_offset)?;
            let distance = addr.checked_sub(first)?;
            let index = distance / stride;

            (distance % stride == 0 && index < buffer.count)
                .then(|| unsafe { buffer.slots.add(index) })
        })?;

        unsafe { slot.as_ref().data.live.then_some(slot) }
    }

    /// Appends a buffer of `extra_size` slots and puts them at the head of
    /// the free chain. Existing values don't move. On failure the pool is
    /// left as it was.
    pub fn grow(&mut self, extra_size: usize) -> Result<(), AllocError> {
        if extra_size == 0 {
            return Ok(());
        }

        let layout = Layout::array::<Slot<T>>(extra_size).map_err(|_| AllocError::CapacityOverflow)?;
        let block = self
            .backend
            .acquire(layout)
            .ok_or(AllocError::OutOfMemory { requested: layout.size() })?;
        let slots = block.ptr.cast::<Slot<T>>();

        unsafe {
            for i in 0..extra_size {
                slots.add(i).write(Node {
                    next: None,
                    prev: None,
                    data: Entry {
                        live: false,
                        value: MaybeUninit::uninit(),
                    },
                });
            }

            self.free.splice_run(slots, extra_size);
        }

        self.buffers.push(PoolBuffer {
            slots,
            count: extra_size,
            block,
        });

        debug!(extra_size, size = self.size(), buffers = self.buffers.len(), "pool grown");

        Ok(())
    }

    /// Drops every live value and puts every slot of every buffer back on
    /// the free chain, in buffer order. Costs O(size), not O(used).
    pub fn reset(&mut self) {
        self.drop_live();
        self.used.clear();
        self.free.clear();

        for buffer in self.buffers.iter().rev() {
            unsafe {
                for i in 0..buffer.count {
                    (*buffer.slots.add(i).as_ptr()).data.live = false;
                }
                self.free.splice_run(buffer.slots, buffer.count);
            }
        }
    }

    fn drop_live(&mut self) {
        if !mem::needs_drop::<T>() || self.used.is_empty() {
            return;
        }

        for slot in self.used.iter() {
            unsafe {
                let entry = &mut (*slot.as_ptr()).data;
                entry.live = false;
                entry.value.assume_init_drop();
            }
        }
    }

    /// Live values, most recently allocated first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.used
            .iter()
            .map(|slot| unsafe { (*slot.as_ptr()).data.value.assume_init_ref() })
    }

    /// Total number of slots across all buffers.
    pub fn size(&self) -> usize {
        self.buffers.iter().map(|buffer| buffer.count).sum()
    }

    /// Number of live values.
    #[inline]
    pub fn used(&self) -> usize {
        self.used.len()
    }

    /// Number of slots ready to be handed out.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

impl<T> Drop for Pool<'_, T> {
    fn drop(&mut self) {
        self.drop_live();

        for buffer in self.buffers.drain(..) {
            self.backend.release(buffer.block);
        }
    }
}

impl<T> fmt::Debug for Pool<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.size())
            .field("used", &self.used())
            .field("buffers", &self.buffers.len())
            .field("arena", &self.backend.is_arena())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn allocation_bounds() {
        let mut pool: Pool<i32> = Pool::new(3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.used(), 0);

        let a = pool.allocate(111).unwrap();
        let b = pool.allocate(222).unwrap();
        let c = pool.allocate(333).unwrap();
        assert_eq!(pool.get(a), Some(&111));
        assert_eq!(pool.get(b), Some(&222));
        assert_eq!(pool.get(c), Some(&333));
        assert_eq!(pool.used(), 3);

        assert!(pool.allocate(444).is_none());
        assert_eq!(pool.used(), 3);

        for ptr in [a, b, c] {
            assert!(pool.deallocate(ptr));
        }
        assert_eq!(pool.used(), 0);

        for value in [1, 2, 3] {
            assert!(pool.allocate(value).is_some());
        }
    }

    #[test]
    fn deallocation_and_reuse() {
        let mut pool = Pool::new(2);
        let p1 = pool.allocate(1).unwrap();
        let p2 = pool.allocate(2).unwrap();
        pool.deallocate(p1);
        pool.deallocate(p2);

        // Most recently freed slot comes back first.
        let p3 = pool.allocate(3).unwrap();
        let p4 = pool.allocate(4).unwrap();
        assert_eq!(p3, p2);
        assert_eq!(p4, p1);
        assert_eq!(pool.get(p3), Some(&3));
    }

    #[test]
    fn grow_and_reset() {
        let mut pool = Pool::new(1);
        let p = pool.allocate(42).unwrap();
        let p_addr = p.as_ptr();

        pool.grow(2).unwrap();
        assert_eq!(pool.size(), 3);

        // The value allocated before the growth did not move.
        assert_eq!(p.as_ptr(), p_addr);
        assert_eq!(pool.get(p), Some(&42));

        let q = pool.allocate(99).unwrap();
        let r = pool.allocate(100).unwrap();
        assert_eq!(pool.used(), 3);
        assert!(pool.allocate(0).is_none());

        pool.deallocate(q);
        pool.deallocate(r);
        pool.deallocate(p);
        assert_eq!(pool.used(), 0);

        pool.allocate(444).unwrap();
        pool.allocate(333).unwrap();
        assert_eq!(pool.used(), 2);

        pool.reset();
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.available(), 3);
        assert!(pool.allocate(9).is_some());
        assert!(pool.allocate(6).is_some());
        assert!(pool.allocate(4).is_some());
        assert!(pool.allocate(4).is_none());
    }

    #[test]
    fn reset_restores_buffer_order() {
        let mut pool = Pool::new(2);
        pool.grow(2).unwrap();
        let first = pool.allocate(0u64).unwrap();
        pool.allocate(1).unwrap();

        pool.reset();

        // After a reset the first slot of the first buffer is handed out first.
        let again = pool.allocate(7).unwrap();
        assert_ne!(again, first);
        pool.reset();
        let buffer_zero = pool.allocate(8).unwrap();
        let next = pool.allocate(9).unwrap();
        assert_eq!(
            next.as_ptr() as usize - buffer_zero.as_ptr() as usize,
            mem::size_of::<Slot<u64>>()
        );
    }

    #[test]
    fn arena_backend_and_grow() {
        let arena = Arena::new(1024 * 10);
        let mut pool = Pool::with_arena(&arena, 2);
        assert_eq!(pool.size(), 2);
        let after_first = arena.used();
        assert!(after_first >= 2 * mem::size_of::<Slot<i32>>());

        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(2).unwrap();

        pool.grow(3).unwrap();
        assert_eq!(pool.size(), 5);
        assert!(arena.used() > after_first);

        assert!(pool.allocate(3).is_some());
        assert_eq!(pool.get(a), Some(&1));
        assert_eq!(pool.get(b), Some(&2));
    }

    #[test]
    fn failed_grow_leaves_pool_untouched() {
        let arena = Arena::new(mem::size_of::<Slot<u32>>() * 2);
        let mut pool = Pool::with_arena(&arena, 2);
        let used_before = arena.used();

        assert!(matches!(pool.grow(1), Err(AllocError::OutOfMemory { .. })));
        assert_eq!(pool.size(), 2);
        assert_eq!(arena.used(), used_before);
        assert!(pool.allocate(1).is_some());
        assert!(pool.allocate(2).is_some());
    }

    #[test]
    fn starved_pool_is_empty() {
        let arena = Arena::new(8);
        let mut pool: Pool<u64> = Pool::with_arena(&arena, 100);
        assert_eq!(pool.size(), 0);
        assert!(pool.allocate(1).is_none());
    }

    #[test]
    fn null_and_double_free_are_noops() {
        let mut pool = Pool::new(1);
        assert!(!pool.deallocate(None));

        let p = pool.allocate(3).unwrap();
        assert!(pool.deallocate(p));
        assert!(!pool.deallocate(p));
        assert!(!pool.deallocate(None));
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.available(), 1);
        assert!(pool.get(p).is_none());
    }

    #[test]
    fn head_of_used_list_is_not_mistaken_for_free() {
        let mut pool = Pool::new(3);
        let a = pool.allocate('a').unwrap();
        let b = pool.allocate('b').unwrap();

        // `b` sits at the head of the used list with no predecessor.
        assert!(pool.deallocate(b));
        assert!(pool.contains(a));
        // `a` is now the head, still live.
        assert!(pool.deallocate(a));
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn foreign_pointers_are_ignored() {
        let mut pool = Pool::new(2);
        let mut other = Pool::new(2);
        let theirs = other.allocate(5).unwrap();

        assert!(!pool.deallocate(theirs));
        assert!(pool.get(theirs).is_none());
        assert_eq!(other.get(theirs), Some(&5));
    }

    #[test]
    fn destructors_run_on_deallocate_reset_and_drop() {
        let token = Rc::new(());
        {
            let mut pool = Pool::new(4);
            let a = pool.allocate(Rc::clone(&token)).unwrap();
            pool.allocate(Rc::clone(&token)).unwrap();
            pool.allocate(Rc::clone(&token)).unwrap();
            assert_eq!(Rc::strong_count(&token), 4);

            pool.deallocate(a);
            assert_eq!(Rc::strong_count(&token), 3);

            pool.reset();
            assert_eq!(Rc::strong_count(&token), 1);

            pool.allocate(Rc::clone(&token)).unwrap();
            assert_eq!(Rc::strong_count(&token), 2);
        }
        assert_eq!(Rc::strong_count(&token), 1);
    }

    #[test]
    fn take_returns_value() {
        let mut pool = Pool::new(1);
        let p = pool.allocate(String::from("hello")).unwrap();
        pool.get_mut(p).unwrap().push_str(" world");

        assert_eq!(pool.take(p).as_deref(), Some("hello world"));
        assert!(pool.take(p).is_none());
    }

    #[test]
    fn iter_yields_live_values() {
        let mut pool = Pool::new(4);
        let a = pool.allocate(1).unwrap();
        pool.allocate(2).unwrap();
        pool.allocate(3).unwrap();
        pool.deallocate(a);

        let values: Vec<_> = pool.iter().copied().collect();
        assert_eq!(values, vec![3, 2]);
    }

    #[test]
    fn churn_with_growth_and_resets() {
        let mut pool = Pool::new(1000);
        let mut ptrs: Vec<Option<PoolPtr<i32>>> = vec![None; 500];

        for cycle in 0..100 {
            for (i, slot) in ptrs.iter_mut().enumerate() {
                *slot = pool.allocate(i as i32);
            }

            if cycle == 30 || cycle == 60 {
                pool.grow(500).unwrap();
            }

            for slot in ptrs.iter_mut().rev() {
                if let Some(ptr) = slot.take() {
                    assert!(pool.deallocate(ptr));
                }
            }

            if cycle % 25 == 0 {
                pool.reset();
                assert_eq!(pool.used(), 0);
            }
        }

        assert_eq!(pool.used(), 0);
        assert_eq!(pool.size(), 2000);
        assert_eq!(pool.available(), 2000);
    }
}
