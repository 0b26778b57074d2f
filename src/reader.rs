//! Reader-side critical section tracking

use core::sync::atomic::{fence, AtomicBool, AtomicU8, Ordering};

use crossbeam_utils::CachePadded;

/// Per-thread read-side state.
///
/// A `Reader` marks the entry and exit of read-side critical sections for one
/// thread. It must be registered with an [`Rcu`] controller before the
/// sections it brackets count toward grace-period detection, and it must be
/// unregistered (outside any section) before it is dropped.
///
/// `lock` and `unlock` are called only by the owning thread; the reclaimer
/// observes the state through the atomics and never writes `nesting`.
///
/// # Examples
///
/// ```
/// use quiesce::Reader;
///
/// let reader = Reader::new();
///
/// reader.lock();
/// // dereference published pointers here
/// reader.unlock();
///
/// // or scoped, which cannot be left unbalanced:
/// {
///     let _section = reader.enter();
/// }
/// assert_eq!(reader.depth(), 0);
/// ```
///
/// [`Rcu`]: crate::Rcu
pub struct Reader {
    state: CachePadded<State>,
}

/// The two words the reclaimer polls. Padded to a cache line so a busy
/// reader does not bounce the line under its neighbours.
struct State {
    /// Depth of active read sections. Written only by the owning thread.
    nesting: AtomicU8,
    /// Quiescence request flag. Set by the reclaimer, cleared by the owner
    /// at its next outermost `unlock`.
    pinned: AtomicBool,
}

impl Reader {
    /// Creates a reader with no active sections.
    pub fn new() -> Self {
        Self {
            state: CachePadded::new(State {
                nesting: AtomicU8::new(0),
                pinned: AtomicBool::new(false),
            }),
        }
    }

    /// Enters a read-side critical section.
    ///
    /// Sections nest up to 255 deep. The store to the nesting counter is
    /// followed by a full fence, so every load issued after `lock` returns
    /// is ordered after the reclaimer can observe the raised depth.
    ///
    /// # Panics
    ///
    /// Panics if the nesting depth would overflow `u8`.
    #[inline]
    pub fn lock(&self) {
        let depth = self.state.nesting.load(Ordering::Relaxed);
        let raised = depth
            .checked_add(1)
            .expect("read section nesting exceeded 255");
        self.state.nesting.store(raised, Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Leaves a read-side critical section.
    ///
    /// The full fence precedes the decrement, so every load of the section
    /// is ordered before the reclaimer can observe the lowered depth. The
    /// pin flag is cleared only when the *outermost* section exits; a nested
    /// unlock must not announce quiescence an outer section could still
    /// contradict.
    ///
    /// # Panics
    ///
    /// Panics if called without a matching [`lock`](Self::lock).
    #[inline]
    pub fn unlock(&self) {
        fence(Ordering::SeqCst);
        let depth = self.state.nesting.load(Ordering::Relaxed);
        assert!(depth > 0, "unlock without a matching lock");
        self.state.nesting.store(depth - 1, Ordering::Relaxed);
        if depth == 1 {
            self.state.pinned.store(false, Ordering::Relaxed);
        }
    }

    /// Enters a read-side critical section, scoped.
    ///
    /// The returned [`ReadSection`] unlocks on drop and is the token that
    /// read-side loads borrow, so a pointer loaded inside the section cannot
    /// outlive it.
    #[inline]
    pub fn enter(&self) -> ReadSection<'_> {
        self.lock();
        ReadSection { reader: self }
    }

    /// Current nesting depth, as last written by the owning thread.
    #[inline]
    pub fn depth(&self) -> u8 {
        self.state.nesting.load(Ordering::Relaxed)
    }

    /// Reclaimer side: request a quiescence announcement.
    #[inline]
    pub(crate) fn mark_pinned(&self) {
        self.state.pinned.store(true, Ordering::Relaxed);
    }

    /// Reclaimer side: has the last request been retracted yet?
    #[inline]
    pub(crate) fn pinned(&self) -> bool {
        self.state.pinned.load(Ordering::Relaxed)
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Reader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reader")
            .field("depth", &self.depth())
            .field("pinned", &self.pinned())
            .finish()
    }
}

/// RAII token for an active read section.
///
/// Returned by [`Reader::enter`]; unlocks the reader on drop. Read-side
/// loads ([`Link::load`], [`List::lookup`]) borrow the section, which pins
/// every pointer they hand out to the section's lifetime.
///
/// [`Link::load`]: crate::Link::load
/// [`List::lookup`]: crate::List::lookup
pub struct ReadSection<'r> {
    reader: &'r Reader,
}

impl<'r> ReadSection<'r> {
    /// The reader this section belongs to.
    #[inline]
    pub fn reader(&self) -> &'r Reader {
        self.reader
    }
}

impl Drop for ReadSection<'_> {
    #[inline]
    fn drop(&mut self) {
        self.reader.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_counts_bracket_pairs() {
        let reader = Reader::new();
        assert_eq!(reader.depth(), 0);

        reader.lock();
        reader.lock();
        assert_eq!(reader.depth(), 2);

        reader.unlock();
        assert_eq!(reader.depth(), 1);
        reader.unlock();
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn pin_cleared_only_at_outermost_unlock() {
        let reader = Reader::new();

        reader.lock();
        reader.lock();
        reader.mark_pinned();

        reader.unlock();
        assert!(reader.pinned(), "nested unlock must not retract the pin");

        reader.unlock();
        assert!(!reader.pinned());
    }

    #[test]
    fn pin_survives_when_set_outside_sections() {
        // The reclaimer may pin a reader that is not in a section; the flag
        // stays up until the next outermost unlock.
        let reader = Reader::new();
        reader.mark_pinned();
        assert!(reader.pinned());

        reader.lock();
        reader.unlock();
        assert!(!reader.pinned());
    }

    #[test]
    fn section_unlocks_on_drop() {
        let reader = Reader::new();
        {
            let outer = reader.enter();
            let _inner = outer.reader().enter();
            assert_eq!(reader.depth(), 2);
        }
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    #[should_panic(expected = "unlock without a matching lock")]
    fn unlock_underflow_panics() {
        Reader::new().unlock();
    }
}
