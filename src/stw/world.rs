use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use atomic::Atomic;
use bytemuck::NoUninit;

use crate::util::semaphore::Semaphore;

/// The state of the stop-the-world state machine. The only legal transitions are
/// `Running -> Stopping -> Stopped -> Starting -> Running`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit, strum_macros::IntoStaticStr)]
pub enum WorldState {
    /// Mutators run freely.
    Running,
    /// `stop_world` is signaling threads and collecting acknowledgments.
    Stopping,
    /// Every live thread acknowledged the current epoch and is parked.
    Stopped,
    /// `start_world` is signaling threads and collecting resume acknowledgments.
    Starting,
}

impl WorldState {
    fn successor(self) -> WorldState {
        match self {
            WorldState::Running => WorldState::Stopping,
            WorldState::Stopping => WorldState::Stopped,
            WorldState::Stopped => WorldState::Starting,
            WorldState::Starting => WorldState::Running,
        }
    }
}

/// State shared between the coordinator and the signal handlers of every mutator.
///
/// Nothing here is behind a lock. The handshake itself is the synchronization:
/// handlers read the epoch, write their own `MutatorThread`, and post a semaphore.
pub struct World {
    /// The current stop epoch. Incremented once per `stop_world`.
    epoch: AtomicU64,
    /// The epoch being resumed by `start_world`. A RESUME that arrives for any
    /// other epoch is stale and ignored by the handler.
    resume_epoch: AtomicU64,
    state: Atomic<WorldState>,
    /// Posted once per thread per epoch by the SUSPEND handler.
    pub(crate) suspend_ack: Semaphore,
    /// Posted once per thread by the SUSPEND handler when it leaves the park loop.
    pub(crate) resume_ack: Semaphore,
    /// SUSPEND deliveries that found the epoch already acknowledged.
    duplicate_deliveries: AtomicUsize,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        World {
            epoch: AtomicU64::new(0),
            resume_epoch: AtomicU64::new(0),
            state: Atomic::new(WorldState::Running),
            suspend_ack: Semaphore::new(0),
            resume_ack: Semaphore::new(0),
            duplicate_deliveries: AtomicUsize::new(0),
        }
    }

    /// The current stop epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn state(&self) -> WorldState {
        self.state.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == WorldState::Stopped
    }

    /// Move to the next state. `from` is what the caller believes the state is.
    /// Anything else means two coordinators are running, which we cannot recover from.
    pub(crate) fn transition(&self, from: WorldState) -> WorldState {
        let to = from.successor();
        if let Err(actual) =
            self.state
                .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
        {
            gc_fatal!(
                "Illegal world state transition {:?} -> {:?}: the world is {:?}",
                from,
                to,
                actual
            );
        }
        trace!("World {:?} -> {:?}", from, to);
        to
    }

    /// Start a new epoch and return it.
    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn resume_epoch(&self) -> u64 {
        self.resume_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn begin_resume(&self, epoch: u64) {
        self.resume_epoch.store(epoch, Ordering::Release);
    }

    pub(crate) fn note_duplicate_delivery(&self) {
        self.duplicate_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset the duplicate delivery counter.
    pub(crate) fn take_duplicate_deliveries(&self) -> usize {
        self.duplicate_deliveries.swap(0, Ordering::Relaxed)
    }

    /// The number of pending SUSPEND acknowledgments not yet consumed by the coordinator.
    pub fn pending_suspend_acks(&self) -> usize {
        self.suspend_ack.value()
    }

    /// The number of pending RESUME acknowledgments not yet consumed by the coordinator.
    pub fn pending_resume_acks(&self) -> usize {
        self.resume_ack.value()
    }
}
