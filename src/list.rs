//! Sorted singly-linked set of `u32` keys
//!
//! The validation structure for the reclamation protocol: one writer
//! inserts and unlinks, any number of readers look keys up concurrently.
//! Along any reachable chain the keys strictly increase and each key
//! appears at most once.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::link::Link;
use crate::reader::ReadSection;

/// A node in the sorted list.
///
/// Allocated by the writer with a fully initialized `next` before the
/// publishing store; after an unlink the node stays valid until a grace
/// period has elapsed, so a reader that already reached it can still walk
/// through its (stale) successor link.
pub struct Node {
    value: u32,
    next: Link<Node>,
}

impl Node {
    fn boxed(value: u32, next: *mut Node) -> *mut Node {
        Box::into_raw(Box::new(Node {
            value,
            next: Link::new(next),
        }))
    }

    /// The key stored in this node.
    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }
}

/// A sorted set of `u32` keys with single-writer mutation and lock-free
/// concurrent lookup.
///
/// [`toggle`](Self::toggle) assumes at most one writer thread at a time and
/// panics if two overlap. An unlinked node returned by `toggle` must not be
/// freed directly; hand it to [`Rcu::retire`] (or an equivalent deferred
/// callback) so destruction waits out a grace period.
///
/// [`Rcu::retire`]: crate::Rcu::retire
pub struct List {
    head: Link<Node>,
    writer: AtomicBool,
}

impl List {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            head: Link::null(),
            writer: AtomicBool::new(false),
        }
    }

    /// Inserts `value` if absent, unlinks it if present.
    ///
    /// Returns `None` on insertion. On removal, returns the unlinked node;
    /// the caller owns its deferred destruction and must keep it alive past
    /// a grace period.
    ///
    /// # Panics
    ///
    /// Panics if another `toggle` is running concurrently; the protocol is
    /// single-writer and refuses to race silently.
    pub fn toggle(&self, value: u32) -> Option<NonNull<Node>> {
        let _claim = self.claim_writer();

        let mut slot = &self.head;
        loop {
            let curr = slot.load_raw(Ordering::Relaxed);
            let Some(node) = (unsafe { curr.as_ref() }) else {
                // Reached the tail: publish a new final node.
                slot.store(Node::boxed(value, ptr::null_mut()), Ordering::Release);
                return None;
            };

            if node.value > value {
                // Overshot: splice a new node in front of `curr`. The release
                // pairs with the acquire loads in `lookup`, so a reader that
                // observes the node observes its initialized successor.
                slot.store(Node::boxed(value, curr), Ordering::Release);
                return None;
            }

            if node.value == value {
                // Unlink by bypassing `curr`. No ordering needed: the node
                // stays valid until the grace period ends, and readers that
                // still reach it continue through its stale successor.
                let succ = node.next.load_raw(Ordering::Relaxed);
                slot.store(succ, Ordering::Relaxed);
                // SAFETY: `curr` came from `Node::boxed`, never null.
                return Some(unsafe { NonNull::new_unchecked(curr) });
            }

            slot = &node.next;
        }
    }

    /// Returns whether `value` is currently in the list.
    ///
    /// Walks with acquire loads inside the caller's read section; terminates
    /// at the first key `>= value`.
    pub fn lookup(&self, value: u32, section: &ReadSection<'_>) -> bool {
        let mut curr = self.head.load(Ordering::Acquire, section);
        // SAFETY: every non-null pointer observed through an acquire load in
        // a live section is kept alive by the reclamation protocol.
        while let Some(node) = unsafe { curr.as_ref() } {
            if node.value >= value {
                return node.value == value;
            }
            curr = node.next.load(Ordering::Acquire, section);
        }
        false
    }

    /// Iterates the keys in ascending order inside a read section.
    ///
    /// The iteration observes a consistent chain but not a snapshot: keys
    /// toggled during the walk may or may not appear.
    pub fn iter<'s, 'r>(&'s self, section: &'s ReadSection<'r>) -> Iter<'s, 'r> {
        Iter {
            curr: self.head.load(Ordering::Acquire, section),
            section,
        }
    }

    fn claim_writer(&self) -> WriterClaim<'_> {
        assert!(
            !self.writer.swap(true, Ordering::Acquire),
            "List::toggle called from two threads at once"
        );
        WriterClaim { list: self }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for List {
    fn drop(&mut self) {
        // `&mut self`: no reader or writer can still observe the chain.
        let mut curr = self.head.load_raw(Ordering::Relaxed);
        while !curr.is_null() {
            // SAFETY: exclusive access; each node was allocated by
            // `Node::boxed` and unlinked nodes are not on the chain.
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next.load_raw(Ordering::Relaxed);
        }
    }
}

/// Scoped single-writer claim; released on drop so a panicking writer does
/// not wedge the list forever.
struct WriterClaim<'l> {
    list: &'l List,
}

impl Drop for WriterClaim<'_> {
    fn drop(&mut self) {
        self.list.writer.store(false, Ordering::Release);
    }
}

/// Ascending key iterator returned by [`List::iter`].
pub struct Iter<'s, 'r> {
    curr: crate::link::Protected<'s, Node>,
    section: &'s ReadSection<'r>,
}

impl Iterator for Iter<'_, '_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        // SAFETY: as in `lookup`, the section keeps observed nodes alive.
        let node = unsafe { self.curr.as_ref() }?;
        self.curr = node.next.load(Ordering::Acquire, self.section);
        Some(node.value)
    }
}
