//! Type-erased deferred reclamation callbacks

/// Signature of a raw reclamation callback.
///
/// The callback receives the opaque payload that was enqueued with it and
/// owns all teardown, including freeing the payload itself if it was
/// heap-allocated.
pub type CallbackFn = unsafe fn(*mut u8);

/// One enqueued reclamation action.
///
/// Invoked exactly once, on the reclaimer thread, after a full grace period
/// has elapsed relative to the enqueue.
pub(crate) struct Callback {
    func: CallbackFn,
    arg: *mut u8,
}

impl Callback {
    pub(crate) fn new(func: CallbackFn, arg: *mut u8) -> Self {
        Self { func, arg }
    }

    /// Runs the action, consuming it.
    ///
    /// # Safety
    ///
    /// A grace period must have elapsed since the callback was enqueued, and
    /// `arg` must still be the payload the enqueuer transferred.
    pub(crate) unsafe fn invoke(self) {
        // SAFETY: forwarded to the enqueuer's contract.
        unsafe { (self.func)(self.arg) }
    }
}

// SAFETY: ownership of `arg` transfers to the controller at enqueue time;
// the payload is touched again only by the reclaimer thread invoking it.
unsafe impl Send for Callback {}

/// Trampoline behind [`Rcu::defer`]: reconstitutes the boxed closure and
/// runs it.
///
/// # Safety
///
/// `arg` must come from `Box::into_raw` on an `F`, and this must be called
/// at most once per such box.
///
/// [`Rcu::defer`]: crate::Rcu::defer
pub(crate) unsafe fn run_boxed<F: FnOnce()>(arg: *mut u8) {
    // SAFETY: caller hands back the pointer produced by `Box::into_raw`.
    let f = unsafe { Box::from_raw(arg.cast::<F>()) };
    f();
}

/// Trampoline behind [`Rcu::retire`]: drops the boxed payload.
///
/// # Safety
///
/// As [`run_boxed`], for a `Box<T>`.
///
/// [`Rcu::retire`]: crate::Rcu::retire
pub(crate) unsafe fn drop_boxed<T>(arg: *mut u8) {
    // SAFETY: caller hands back the pointer produced by `Box::into_raw`.
    drop(unsafe { Box::from_raw(arg.cast::<T>()) });
}
