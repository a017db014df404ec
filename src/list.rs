use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Every Region, Heap and allocation header is a `Node` written in place
/// inside memory the allocator already owns. `repr(C)` keeps the links in
/// front so that the address of a node is also the address of its header.
#[repr(C)]
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Intrusive doubly linked list.
///
/// The list never allocates. Every insertion receives the address where the
/// node has to be written, so nodes live exactly where the allocator wants
/// them (the start of a Region mapping, the first page of a Heap, right in
/// front of a payload).
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

/// Iterator over the node pointers of a [`List`].
pub(crate) struct Iter<T> {
    current: Link<Node<T>>,
    remaining: usize,
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
    pub fn first(&self) -> Link<Node<T>> {
        self.head
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes a new node holding `data` at `addr` and links it as the new head.
    ///
    /// **SAFETY**: Caller must guarantee that `addr` is valid for writes of a
    /// `Node<T>`, suitably aligned, and not aliased by any live node.
    pub unsafe fn push_front(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: self.head,
                prev: None,
                data,
            });

            if let Some(mut head) = self.head {
                head.as_mut().prev = Some(node);
            }
        }

        self.head = Some(node);
        self.len += 1;

        node
    }

    /// Writes a new node holding `data` at `addr` and links it right after
    /// `after`, which must already belong to this list.
    ///
    /// **SAFETY**: Same requirements as [`List::push_front`].
    pub unsafe fn insert_after(
        &mut self,
        mut after: NonNull<Node<T>>,
        data: T,
        addr: NonNull<u8>,
    ) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            let next = after.as_ref().next;

            node.as_ptr().write(Node {
                next,
                prev: Some(after),
                data,
            });

            if let Some(mut next) = next {
                next.as_mut().prev = Some(node);
            }
            after.as_mut().next = Some(node);
        }

        self.len += 1;

        node
    }

    /// Unlinks `node` from the list. The memory of the node is left untouched.
    ///
    /// **SAFETY**: `node` must belong to this list.
    pub unsafe fn remove(&mut self, node: NonNull<Node<T>>) {
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
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter<T> {
        Iter {
            current: self.head,
            remaining: self.len,
        }
    }
}

impl<T> Iterator for Iter<T> {
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

impl<T> IntoIterator for &List<T> {
    type Item = NonNull<Node<T>>;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
