//! The mutator side of the handshake.
//!
//! Both handlers run on the mutator thread, possibly interrupting it at any
//! instruction, so they must stay async-signal-safe: no allocation, no locks, no
//! logging. They only touch atomics of the shared [`World`] and of the thread's own
//! [`MutatorThread`], and post semaphores with `sem_post`.

use crate::stw::World;
use crate::thread::MutatorThread;
use crate::util::stack;

/// Handle a SUSPEND delivery.
///
/// If this thread already acknowledged the current epoch, the delivery is a
/// duplicate (a retry that raced with a late first delivery) and only gets counted.
/// Otherwise the thread publishes its stack pointer, acknowledges exactly once, and
/// parks until a RESUME for this epoch was handled. `wait_for_signal` blocks until
/// some signal that is allowed through the park mask was handled (`sigsuspend` for
/// real signals). It may return spuriously, the latch is re-checked each time.
pub fn suspend_handler<W: FnMut()>(world: &World, me: &MutatorThread, mut wait_for_signal: W) {
    let epoch = world.epoch();
    if me.last_stop_count() == epoch {
        world.note_duplicate_delivery();
        return;
    }

    // Keep the callee-saved registers spilled until we leave the park loop.
    stack::with_callee_saves_pushed(|sp| {
        me.publish_stack_pointer(sp);
        me.enter_suspended(epoch);
        world.suspend_ack.post();

        while !me.resume_received() {
            wait_for_signal();
        }

        me.leave_suspended();
        world.resume_ack.post();
    })
}

/// Handle a RESUME delivery. A RESUME for an epoch other than the one this thread
/// acknowledged is stale (a retry that arrived late) and ignored.
pub fn resume_handler(world: &World, me: &MutatorThread) {
    if world.resume_epoch() == me.last_stop_count() {
        me.latch_resume();
    }
}
