use std::{marker::PhantomData, ptr::NonNull};

use crate::list::{Link, Node};

/// Singly-linked chain of unused pool slots.
///
/// Free slots have no payload worth keeping, so the chain is threaded
/// through the `next` field of the slot nodes themselves. It costs no
/// memory beyond what the slots already carry:
///
/// ```text
///   head
///    |     next        next        next
///    v  +-------+   +-------+   +-------+
///       | free  |-->| free  |-->| free  |--> None
///       +-------+   +-------+   +-------+
/// ```
///
/// Push and pop both work on the head, so the most recently released
/// slot is the first one handed out again.
pub(crate) struct FreeList<T> {
    head: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

impl<T> FreeList<T> {
    /// Creates a new empty chain.
    pub const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            marker: PhantomData,
        }
    }

    /// It tells whether the FreeList is empty or not.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Puts `node` at the head of the chain.
    ///
    /// **SAFETY**: `node` must be valid for writes and not be linked in any
    /// other list.
    #[inline]
    pub unsafe fn push(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            node.as_mut().prev = None;
            node.as_mut().next = self.head;
        }
        self.head = Some(node);
        self.len += 1;
    }

    /// Takes the head of the chain.
    #[inline]
    pub fn pop(&mut self) -> Link<Node<T>> {
        let mut node = self.head?;

        unsafe {
            self.head = node.as_ref().next;
            node.as_mut().next = None;
        }
        self.len -= 1;

        Some(node)
    }

    /// Splices a contiguous run of `count` nodes starting at `first` in
    /// front of the current head, keeping their memory order.
    ///
    /// **SAFETY**: `first..first + count` must be valid, unlinked nodes.
    pub unsafe fn splice_run(&mut self, first: NonNull<Node<T>>, count: usize) {
        unsafe {
            for i in (0..count).rev() {
                self.push(first.add(i));
            }
        }
    }

    /// Forgets every node without touching them.
    #[inline]
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }
}
