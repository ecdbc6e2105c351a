use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use crate::thread::MutatorThread;
use crate::util::stack;

thread_local! {
    /// The registered `MutatorThread` of the current thread. The pointer owns one
    /// strong count of the `Arc`, so it stays valid until the thread unregisters.
    /// Signal handlers read it, so it must stay const-initialized with no destructor.
    static CURRENT: Cell<*const MutatorThread> = const { Cell::new(std::ptr::null()) };
}

/// The table of registered mutator threads.
///
/// The table mutex is the GC allocation lock. The coordinator holds it for the
/// whole pause, so no thread can register, unregister or leave a blocking region
/// while the world is stopped. Signal handlers never take it. They find their own
/// `MutatorThread` through a thread-local pointer (see [`current_thread`]).
#[derive(Default)]
pub struct ThreadRegistry {
    threads: Mutex<Vec<Arc<MutatorThread>>>,
}

/// Holding this guard means holding the allocation lock.
pub struct RegistryGuard<'a> {
    threads: MutexGuard<'a, Vec<Arc<MutatorThread>>>,
}

impl RegistryGuard<'_> {
    /// Add a thread. Registering the same thread twice is a bug in the runtime.
    ///
    /// Only threads whose signal handlers can find them (see
    /// [`ThreadRegistry::register_current`]) may be added.
    pub(crate) fn register(&mut self, thread: Arc<MutatorThread>) {
        assert!(
            self.lookup(thread.id()).is_none(),
            "Thread {:?} is already registered",
            thread.id()
        );
        debug!("Register {:?}", thread.id());
        self.threads.push(thread);
    }

    /// Remove a thread. It is marked finished first, so it is never signaled again.
    pub fn unregister(&mut self, id: ThreadId) -> Option<Arc<MutatorThread>> {
        let index = self.threads.iter().position(|t| t.id() == id)?;
        let thread = self.threads.swap_remove(index);
        thread.set_finished();
        debug!("Unregister {:?}", id);
        Some(thread)
    }

    pub fn lookup(&self, id: ThreadId) -> Option<&Arc<MutatorThread>> {
        self.threads.iter().find(|t| t.id() == id)
    }

    /// Call `f` on every registered thread that is not finished.
    pub fn for_each_live<F: FnMut(&Arc<MutatorThread>)>(&self, mut f: F) {
        self.threads
            .iter()
            .filter(|t| !t.is_finished())
            .for_each(|t| f(t));
    }

    /// All registered threads, including finished ones that have not unregistered yet.
    pub fn threads(&self) -> impl Iterator<Item = &Arc<MutatorThread>> {
        self.threads.iter()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the allocation lock.
    pub fn lock(&self) -> RegistryGuard<'_> {
        // A poisoned lock means a panic while the world was stopped. The table itself
        // is still consistent, as every mutation is a single push or remove.
        let threads = self
            .threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        RegistryGuard { threads }
    }

    pub fn unregister(&self, id: ThreadId) -> Option<Arc<MutatorThread>> {
        self.lock().unregister(id)
    }

    pub fn lookup(&self, id: ThreadId) -> Option<Arc<MutatorThread>> {
        self.lock().lookup(id).cloned()
    }

    pub fn for_each_live<F: FnMut(&Arc<MutatorThread>)>(&self, f: F) {
        self.lock().for_each_live(f)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Register the calling thread and make it reachable from its signal handlers.
    /// Blocks while the world is stopped.
    pub fn register_current(&self) -> Arc<MutatorThread> {
        assert!(
            current_thread().is_none(),
            "The current thread is already registered"
        );
        let thread = Arc::new(MutatorThread::current());
        let mut guard = self.lock();
        // A coordinator can signal the thread as soon as it is in the table, so the
        // handlers must already be able to find it.
        CURRENT.with(|c| c.set(Arc::into_raw(thread.clone())));
        guard.register(thread.clone());
        thread
    }

    /// Unregister the calling thread. Blocks while the world is stopped.
    pub fn unregister_current(&self) {
        let Some(me) = current_thread() else {
            warn!("unregister_current() called on a thread that is not registered");
            return;
        };
        // Stop accepting signals before we wait for the lock.
        me.set_finished();
        self.unregister(me.id());
        let raw = CURRENT.with(|c| c.replace(std::ptr::null()));
        // Drop the strong count held by the thread-local pointer.
        drop(unsafe { Arc::from_raw(raw) });
    }

    /// Enter a blocking region. Prefer [`ThreadRegistry::do_blocking`], which keeps the
    /// callee-saved registers spilled for the whole region.
    #[inline(always)]
    pub fn enter_blocking(&self) {
        if let Some(me) = current_thread() {
            debug_assert!(!me.is_blocked(), "Nested blocking region");
            me.publish_stack_pointer(stack::flush_to_stack());
            me.set_blocked(true);
        }
    }

    /// Leave a blocking region. Waits while the world is stopped.
    pub fn leave_blocking(&self) {
        if let Some(me) = current_thread() {
            let _alloc_lock = self.lock();
            me.set_blocked(false);
        }
    }

    /// Run `f` in a blocking region (a blocking syscall, a long native call).
    ///
    /// The thread publishes its stack pointer and is treated as already stopped, so
    /// the coordinator does not signal it. Leaving the region takes the allocation
    /// lock, so the thread cannot return to managed code while the world is stopped.
    pub fn do_blocking<R, F: FnOnce() -> R>(&self, f: F) -> R {
        let me = match current_thread() {
            Some(me) => me,
            None => return f(),
        };
        debug_assert!(!me.is_blocked(), "Nested blocking region");
        stack::with_callee_saves_pushed(|sp| {
            me.publish_stack_pointer(sp);
            me.set_blocked(true);
            let result = f();
            let _alloc_lock = self.lock();
            me.set_blocked(false);
            result
        })
    }
}

/// The `MutatorThread` of the calling thread, if it registered through
/// [`ThreadRegistry::register_current`].
///
/// Async-signal-safe: this is a single read of a const-initialized thread-local.
pub fn current_thread() -> Option<&'static MutatorThread> {
    let raw = CURRENT.with(|c| c.get());
    // The pointer holds a strong count until `unregister_current`, which only the
    // current thread can call, so the reference is valid for as long as it is used.
    unsafe { raw.as_ref() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn register_and_unregister_current() {
        thread::spawn(|| {
            let registry = ThreadRegistry::new();
            assert!(current_thread().is_none());
            let me = registry.register_current();
            assert_eq!(registry.len(), 1);
            assert_eq!(current_thread().map(|t| t.id()), Some(me.id()));
            assert!(registry.lookup(me.id()).is_some());

            registry.unregister_current();
            assert!(registry.is_empty());
            assert!(current_thread().is_none());
            assert!(me.is_finished());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn for_each_live_skips_finished() {
        let registry = ThreadRegistry::new();
        let handles: Vec<_> = (0..3)
            .map(|_| thread::spawn(|| Arc::new(MutatorThread::current())))
            .collect();
        let threads: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for t in &threads {
            registry.lock().register(t.clone());
        }
        threads[1].set_finished();

        let mut seen = vec![];
        registry.for_each_live(|t| seen.push(t.id()));
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains(&threads[1].id()));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn double_registration_is_rejected() {
        let registry = ThreadRegistry::new();
        let t = Arc::new(MutatorThread::current());
        registry.lock().register(t.clone());
        registry.lock().register(t);
    }

    #[test]
    fn blocking_region_publishes_and_clears() {
        thread::spawn(|| {
            let registry = ThreadRegistry::new();
            let me = registry.register_current();
            let inside = registry.do_blocking(|| {
                assert!(me.is_blocked());
                me.stack_pointer()
            });
            assert!(inside.is_some());
            assert!(!me.is_blocked());
            registry.unregister_current();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn explicit_blocking_region() {
        thread::spawn(|| {
            let registry = ThreadRegistry::new();
            let me = registry.register_current();
            registry.enter_blocking();
            assert!(me.is_blocked());
            assert!(me.stack_pointer().is_some());
            registry.leave_blocking();
            assert!(!me.is_blocked());
            registry.unregister_current();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn blocking_region_cannot_exit_while_locked() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Barrier;

        let registry = Arc::new(ThreadRegistry::new());
        let entered = Arc::new(Barrier::new(2));
        let left = Arc::new(AtomicBool::new(false));

        let guard = registry.lock();
        let handle = {
            let registry = registry.clone();
            let entered = entered.clone();
            let left = left.clone();
            thread::spawn(move || {
                // Registration needs the lock, so register a detached record instead.
                let me = Arc::new(MutatorThread::current());
                CURRENT.with(|c| c.set(Arc::into_raw(me.clone())));
                registry.do_blocking(|| {
                    entered.wait();
                });
                left.store(true, Ordering::SeqCst);
                let raw = CURRENT.with(|c| c.replace(std::ptr::null()));
                drop(unsafe { Arc::from_raw(raw) });
            })
        };
        entered.wait();
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!left.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(left.load(Ordering::SeqCst));
    }
}
