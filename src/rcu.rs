//! The RCU controller: reader registry, callback queues, grace-period
//! detection, and the background reclaimer
//!
//! Writers retract data, enqueue a callback, and keep going; readers mark
//! their critical sections through [`Reader`]; the reclaimer thread proves
//! on a periodic tick that every registered reader has passed a quiescent
//! point since a batch was snapshotted, then runs the batch.

use core::sync::atomic::{fence, Ordering};
use std::collections::TryReserveError;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::callback::{self, Callback, CallbackFn};
use crate::event::{Event, Wake};
use crate::reader::Reader;

/// Period of the reclaimer's quiescence polling.
///
/// Also the latency floor for [`Rcu::synchronize`] and deferred callbacks:
/// a grace period is never declared faster than one tick.
const GRACE_TICK: Duration = Duration::from_millis(8);

/// Errors from the fallible controller operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The tracker registry or a callback queue could not grow.
    #[error("reclamation queue allocation failed: {0}")]
    Capacity(#[from] TryReserveError),
}

/// One registered reader plus the scratch flag of the current grace-period
/// attempt. The flag is meaningless between attempts.
struct Tracker {
    reader: Arc<Reader>,
    quiescent: bool,
}

/// Everything guarded by the controller mutex.
struct State {
    trackers: Vec<Tracker>,
    /// Current batch, still accepting enqueues.
    callbacks: Vec<Callback>,
    /// Batch under grace-period observation. Touched only by the reclaimer.
    next: Vec<Callback>,
}

struct Core {
    state: Mutex<State>,
    wake: Event,
}

/// The reclamation controller.
///
/// Owns the reader registry, the two callback queues, and (while running)
/// the background reclaimer thread. All methods take `&self`; the
/// controller is shared across the writer, the readers, and teardown.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use quiesce::{Rcu, Reader};
///
/// let rcu = Rcu::new();
/// let reader = Arc::new(Reader::new());
/// rcu.register(&reader).unwrap();
/// rcu.start_background();
///
/// reader.lock();
/// // ... dereference published pointers ...
/// reader.unlock();
///
/// // Retract data, then defer its destruction past a grace period.
/// rcu.defer(|| { /* free the retracted allocation */ }).unwrap();
/// rcu.synchronize().unwrap();
///
/// rcu.stop_background();
/// rcu.unregister(&reader);
/// ```
pub struct Rcu {
    core: Arc<Core>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl Rcu {
    /// Creates a controller with no readers, no callbacks, and no
    /// background thread.
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core {
                state: Mutex::new(State {
                    trackers: Vec::new(),
                    callbacks: Vec::new(),
                    next: Vec::new(),
                }),
                wake: Event::new(),
            }),
            reclaimer: Mutex::new(None),
        }
    }

    /// Registers `reader` with the controller.
    ///
    /// From this point the reader's critical sections hold back grace
    /// periods. The registry keeps a clone of the `Arc`; the owner keeps
    /// its own and drops it after [`unregister`](Self::unregister).
    ///
    /// # Panics
    ///
    /// Panics if `reader` is already registered.
    pub fn register(&self, reader: &Arc<Reader>) -> Result<(), Error> {
        let mut state = self.core.state.lock();
        assert!(
            !state.trackers.iter().any(|t| Arc::ptr_eq(&t.reader, reader)),
            "reader is already registered"
        );
        state.trackers.try_reserve(1)?;
        state.trackers.push(Tracker {
            reader: Arc::clone(reader),
            quiescent: false,
        });
        Ok(())
    }

    /// Removes `reader` from the registry.
    ///
    /// # Panics
    ///
    /// Panics if `reader` is not registered, or if it is still inside a
    /// read section.
    pub fn unregister(&self, reader: &Arc<Reader>) {
        let mut state = self.core.state.lock();
        let index = state
            .trackers
            .iter()
            .position(|t| Arc::ptr_eq(&t.reader, reader))
            .expect("reader is not registered");
        assert_eq!(
            state.trackers[index].reader.depth(),
            0,
            "reader unregistered while inside a read section"
        );
        state.trackers.swap_remove(index);
    }

    /// Enqueues a raw reclamation callback.
    ///
    /// `func(arg)` runs exactly once, on the reclaimer thread, after a full
    /// grace period has elapsed relative to this call. If the controller is
    /// dropped before that grace period completes, the callback is dropped
    /// uninvoked and `arg` is the caller's leak.
    ///
    /// # Safety
    ///
    /// Ownership of whatever `arg` points to transfers to the callback; the
    /// caller must not touch it after enqueueing, and `func` must be sound
    /// to run on another thread with that payload.
    pub unsafe fn call(&self, func: CallbackFn, arg: *mut u8) -> Result<(), Error> {
        let mut state = self.core.state.lock();
        state.callbacks.try_reserve(1)?;
        state.callbacks.push(Callback::new(func, arg));
        Ok(())
    }

    /// Defers a closure past a grace period.
    ///
    /// The closure runs exactly once on the reclaimer thread. On enqueue
    /// failure the closure is dropped here, not leaked.
    pub fn defer<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let arg = Box::into_raw(Box::new(f)).cast::<u8>();
        // SAFETY: the trampoline reconstitutes the box exactly once.
        let enqueued = unsafe { self.call(callback::run_boxed::<F>, arg) };
        if enqueued.is_err() {
            // SAFETY: the enqueue failed, so ownership never left us.
            drop(unsafe { Box::from_raw(arg.cast::<F>()) });
        }
        enqueued
    }

    /// Defers dropping of a boxed allocation past a grace period.
    ///
    /// The usual way to destroy a node returned by [`List::toggle`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, must not be reachable by any
    /// *future* read section, and must not be touched again by the caller.
    ///
    /// [`List::toggle`]: crate::List::toggle
    pub unsafe fn retire<T: Send + 'static>(&self, ptr: *mut T) -> Result<(), Error> {
        // SAFETY: drop_boxed undoes the caller's Box::into_raw once.
        unsafe { self.call(callback::drop_boxed::<T>, ptr.cast()) }
    }

    /// Blocks until a full grace period has elapsed.
    ///
    /// Every read section that was active when this call started has exited
    /// by the time it returns. Expect at least one reclaimer tick (8 ms) of
    /// latency.
    ///
    /// # Panics
    ///
    /// Panics if the background reclaimer is not running, since nothing
    /// would ever complete the wait.
    pub fn synchronize(&self) -> Result<(), Error> {
        assert!(
            self.reclaimer.lock().is_some(),
            "synchronize requires a running reclaimer"
        );
        let done = Arc::new(Event::new());
        let observer = Arc::clone(&done);
        self.defer(move || observer.set())?;
        done.wait();
        Ok(())
    }

    /// Spawns the background reclaimer.
    ///
    /// # Panics
    ///
    /// Panics if a reclaimer is already running.
    pub fn start_background(&self) {
        let mut slot = self.reclaimer.lock();
        assert!(slot.is_none(), "reclaimer is already running");
        self.core.wake.reset();

        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name("quiesce-reclaimer".into())
            .spawn(move || reclaim_loop(&core))
            .expect("failed to spawn reclaimer thread");
        *slot = Some(handle);
    }

    /// Signals the reclaimer to shut down and joins it.
    ///
    /// The reclaimer keeps running passes until every batch it can prove a
    /// grace period for has been invoked; with all readers outside their
    /// sections this drains both queues completely. Callbacks that never
    /// reach a grace period (a reader parked inside a section would hold
    /// them back indefinitely) remain queued and are dropped uninvoked when
    /// the controller is dropped.
    ///
    /// Does nothing if no reclaimer is running.
    pub fn stop_background(&self) {
        let handle = self.reclaimer.lock().take();
        if let Some(handle) = handle {
            self.core.wake.set();
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

impl Default for Rcu {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Rcu {
    fn drop(&mut self) {
        self.stop_background();
        let state = self.core.state.lock();
        for tracker in &state.trackers {
            assert_eq!(
                tracker.reader.depth(),
                0,
                "controller dropped while a reader is inside a read section"
            );
        }
    }
}

/// What the loop should do after one pass.
#[derive(PartialEq, Eq, Debug)]
enum Pass {
    Continue,
    /// Shutdown: the wake was a signal and nothing is under observation.
    Exit,
}

fn reclaim_loop(core: &Core) {
    loop {
        let wake = core.wake.wait_timeout(GRACE_TICK);
        if reclaim_pass(core, wake) == Pass::Exit {
            return;
        }
    }
}

/// One reclaimer pass: promote the current batch if observation is idle,
/// scan for quiescence, and invoke the batch once the grace period holds.
fn reclaim_pass(core: &Core, wake: Wake) -> Pass {
    let mut state = core.state.lock();

    // A fresh observation starts by snapshotting the current batch, so
    // callbacks enqueued from here on cannot perturb the cohort being
    // watched. `set_pin` marks this pass as the initiating one.
    let set_pin = if state.next.is_empty() {
        let state = &mut *state;
        mem::swap(&mut state.callbacks, &mut state.next);
        true
    } else {
        false
    };

    if state.next.is_empty() {
        return match wake {
            Wake::Signaled => Pass::Exit,
            Wake::TimedOut => Pass::Continue,
        };
    }

    if !observe_grace_period(&mut state.trackers, set_pin) {
        return Pass::Continue;
    }

    for tracker in &mut state.trackers {
        tracker.quiescent = false;
    }
    let batch = mem::take(&mut state.next);
    drop(state);

    // Orders the quiescence observations before the destructors run.
    fence(Ordering::SeqCst);
    for cb in batch {
        // SAFETY: every registered reader has been observed quiescent since
        // the batch was snapshotted, so no read section still reaches the
        // payloads.
        unsafe { cb.invoke() };
    }
    Pass::Continue
}

/// Scans the tracker set once. Returns true when every tracker has been
/// observed quiescent since the batch was snapshotted.
fn observe_grace_period(trackers: &mut [Tracker], set_pin: bool) -> bool {
    let mut all_quiescent = true;
    for tracker in trackers.iter_mut().filter(|t| !t.quiescent) {
        if set_pin {
            tracker.reader.mark_pinned();
        } else if !tracker.reader.pinned() {
            // Pin retracted: the reader ran an outermost unlock since the
            // initiating pass, so it holds no pre-snapshot pointers.
            tracker.quiescent = true;
            continue;
        }

        if tracker.reader.depth() == 0 {
            tracker.quiescent = true;
        } else {
            all_quiescent = false;
        }
    }
    all_quiescent
}
