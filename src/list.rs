use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Intrusive list node. The pool's slots *are* nodes: the links live right
/// next to the payload, so moving a slot between lists never touches the
/// payload and never allocates.
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Doubly-linked list of nodes that live somewhere else.
///
/// The list never allocates: nodes are handed to it already placed in
/// memory (a pool buffer), and it only rewires their links. New nodes go
/// to the head, and any node can be unlinked in O(1).
///
/// ```text
///          head
///           |
///           v
///        +------+ next +------+ next +------+
/// None <-| Node |----->| Node |----->| Node |-> None
///        +------+<-----+------+<-----+------+
///                 prev          prev
/// ```
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `node` in front of the current head.
    ///
    /// **SAFETY**: `node` must be valid for writes and not currently be a
    /// member of this (or any other) list.
    pub unsafe fn push_front(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            node.as_mut().prev = None;
            node.as_mut().next = self.head;

            if let Some(mut head) = self.head {
                head.as_mut().prev = Some(node);
            }
        }

        self.head = Some(node);
        self.len += 1;
    }

    /// Unlinks `node`, patching its neighbours and the head if needed.
    ///
    /// **SAFETY**: `node` must currently be a member of this list.
    pub unsafe fn remove(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            let next = node.as_ref().next;
            let prev = node.as_ref().prev;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            if let Some(mut next) = next {
                next.as_mut().prev = prev;
            }

            node.as_mut().next = None;
            node.as_mut().prev = None;
        }

        self.len -= 1;
    }

    /// Forgets every node without touching them.
    #[inline]
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }
        self.remaining -= 1;

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = NonNull<Node<T>>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(values: &[u32]) -> Vec<Node<u32>> {
        values
            .iter()
            .map(|&data| Node { next: None, prev: None, data })
            .collect()
    }

    fn contents(list: &List<u32>) -> Vec<u32> {
        list.iter().map(|node| unsafe { node.as_ref().data }).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list: List<u8> = List::new();

        assert_eq!(list.len(), 0);
        assert!(list.is_empty());
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn push_front_reverses_order() {
        let mut storage = nodes(&[1, 2, 3]);
        let mut list = List::new();

        for node in storage.iter_mut() {
            unsafe { list.push_front(NonNull::from(node)) };
        }

        assert_eq!(list.len(), 3);
        assert_eq!(contents(&list), vec![3, 2, 1]);
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut storage = nodes(&[1, 2, 3, 4]);
        let ptrs: Vec<_> = storage.iter_mut().map(NonNull::from).collect();
        let mut list = List::new();
        for &ptr in &ptrs {
            unsafe { list.push_front(ptr) };
        }
        // list: 4 3 2 1

        unsafe {
            list.remove(ptrs[2]);
            assert_eq!(contents(&list), vec![4, 2, 1]);

            list.remove(ptrs[3]);
            assert_eq!(contents(&list), vec![2, 1]);
            assert_eq!(list.iter().next(), Some(ptrs[1]));
            assert!(ptrs[1].as_ref().prev.is_none());

            list.remove(ptrs[0]);
            assert_eq!(contents(&list), vec![2]);

            list.remove(ptrs[1]);
        }

        assert!(list.is_empty());
        assert!(list.iter().next().is_none());
    }
}
