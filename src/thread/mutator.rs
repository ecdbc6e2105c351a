use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;

use atomic::Atomic;

use crate::util::stack;
use crate::util::Address;

/// The bookkeeping for one registered mutator thread.
///
/// Every field is an atomic. The thread itself is the only writer of the
/// suspension fields (from its SUSPEND/RESUME handlers), and the coordinator reads
/// them. The coordinator only trusts the published stack pointer while the thread
/// is known to be suspended or blocked.
pub struct MutatorThread {
    id: ThreadId,
    native: libc::pthread_t,
    /// The lowest address of the thread's stack.
    stack_low: Address,
    /// The stack base. The stack grows down from here.
    stack_base: Address,
    /// The last published stack pointer. Zero if never published.
    stack_pointer: Atomic<Address>,
    /// The last stop epoch this thread acknowledged.
    last_stop_count: AtomicU64,
    /// The thread is in a blocking region and has published its stack pointer.
    blocked: AtomicBool,
    /// The thread is exiting and must not be signaled any more.
    finished: AtomicBool,
    /// The thread is parked in its SUSPEND handler.
    suspended: AtomicBool,
    /// Set by the RESUME handler. The parked thread loops until it sees this.
    resume_received: AtomicBool,
}

impl MutatorThread {
    /// Describe the calling thread.
    pub fn current() -> Self {
        let (stack_low, stack_base) = match stack::current_stack_bounds() {
            Ok(bounds) => bounds,
            Err(e) => {
                // Not fatal: the stack scanner will fall back to the published stack pointer.
                warn!("Unable to read stack bounds of the current thread: {}", e);
                let sp = stack::approximate_sp();
                (sp, sp)
            }
        };
        Self::new(
            std::thread::current().id(),
            unsafe { libc::pthread_self() },
            stack_low,
            stack_base,
        )
    }

    /// Describe a thread with an explicit identity and stack range.
    pub fn new(
        id: ThreadId,
        native: libc::pthread_t,
        stack_low: Address,
        stack_base: Address,
    ) -> Self {
        MutatorThread {
            id,
            native,
            stack_low,
            stack_base,
            stack_pointer: Atomic::new(unsafe { Address::from_usize(0) }),
            last_stop_count: AtomicU64::new(0),
            blocked: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            resume_received: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The native thread handle, used as the target of `pthread_kill`.
    pub fn native(&self) -> libc::pthread_t {
        self.native
    }

    /// The `[low, base)` range of the thread's stack.
    pub fn stack_bounds(&self) -> (Address, Address) {
        (self.stack_low, self.stack_base)
    }

    pub fn stack_base(&self) -> Address {
        self.stack_base
    }

    /// The last published stack pointer, if any.
    pub fn stack_pointer(&self) -> Option<Address> {
        let sp = self.stack_pointer.load(Ordering::Acquire);
        (sp.as_usize() != 0).then_some(sp)
    }

    /// The range a conservative scanner should scan: from the published stack pointer
    /// up to the stack base.
    pub fn scan_range(&self) -> Option<(Address, Address)> {
        self.stack_pointer().map(|sp| (sp, self.stack_base))
    }

    pub fn last_stop_count(&self) -> u64 {
        self.last_stop_count.load(Ordering::Acquire)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn resume_received(&self) -> bool {
        self.resume_received.load(Ordering::Acquire)
    }

    pub(crate) fn publish_stack_pointer(&self, sp: Address) {
        self.stack_pointer.store(sp, Ordering::Release);
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub(crate) fn set_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    /// Called by the SUSPEND handler, before posting the acknowledgment.
    pub(crate) fn enter_suspended(&self, epoch: u64) {
        self.resume_received.store(false, Ordering::SeqCst);
        self.suspended.store(true, Ordering::SeqCst);
        self.last_stop_count.store(epoch, Ordering::Release);
    }

    /// Called by the SUSPEND handler, after it saw the resume latch.
    pub(crate) fn leave_suspended(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    /// Called by the RESUME handler.
    pub(crate) fn latch_resume(&self) {
        self.resume_received.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for MutatorThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutatorThread")
            .field("id", &self.id)
            .field("stack_base", &self.stack_base)
            .field("stack_pointer", &self.stack_pointer())
            .field("last_stop_count", &self.last_stop_count())
            .field("blocked", &self.is_blocked())
            .field("finished", &self.is_finished())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}
