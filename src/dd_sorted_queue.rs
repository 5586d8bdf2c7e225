// Sorted queue backing the event scheduler
//
// An unbalanced binary search tree. Items that compare equal always descend
// right, so a run of ties forms a right-leaning chain in insertion order and
// pop() hands them back FIFO. Depth depends on insertion order; for the event
// volumes of a simulation run this is fine.

/// Ordering predicate for queue items.
pub trait LessThan {
    fn is_less_than(&self, other: &Self) -> bool;
}

struct QueueNode<T> {
    item: T,
    // everything here is less than `item`
    left: Option<Box<QueueNode<T>>>,
    // everything here is not-less-than `item`
    right: Option<Box<QueueNode<T>>>,
}

pub struct SortedQueue<T: LessThan> {
    root: Option<Box<QueueNode<T>>>,
    len: usize,
}

impl<T: LessThan> SortedQueue<T> {
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn insert(&mut self, item: T) {
        let mut link = &mut self.root;
        while let Some(node) = link {
            link = if item.is_less_than(&node.item) {
                &mut node.left
            } else {
                &mut node.right
            };
        }
        *link = Some(Box::new(QueueNode {
            item,
            left: None,
            right: None,
        }));
        self.len += 1;
    }

    /// Remove and return the minimal item, `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        let mut link = &mut self.root;
        while link.as_ref().map_or(false, |node| node.left.is_some()) {
            link = &mut link.as_mut()?.left;
        }

        let node = link.take()?;
        let QueueNode { item, right, .. } = *node;
        *link = right;
        self.len -= 1;
        Some(item)
    }

    /// The item `pop()` would return next.
    pub fn peek(&self) -> Option<&T> {
        let mut node = self.root.as_ref()?;
        while let Some(left) = node.left.as_ref() {
            node = left;
        }
        Some(&node.item)
    }

    pub fn clear(&mut self) {
        // iterative, a long chain of ties would overflow a recursive drop
        let mut stack: Vec<Box<QueueNode<T>>> = self.root.take().into_iter().collect();
        while let Some(mut node) = stack.pop() {
            stack.extend(node.left.take());
            stack.extend(node.right.take());
        }
        self.len = 0;
    }
}

impl<T: LessThan> Default for SortedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LessThan> Drop for SortedQueue<T> {
    fn drop(&mut self) {
        self.clear();
    }
}
