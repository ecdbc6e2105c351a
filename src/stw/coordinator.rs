use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Instant;

use crate::stw::backend::{GcSignal, SendError, SignalBackend};
use crate::stw::posix::{PosixSignals, SignalInstallError};
use crate::stw::{World, WorldState};
use crate::thread::{current_thread, MutatorThread, RegistryGuard, ThreadRegistry};
use crate::util::options::Options;
use crate::util::stack;
use crate::util::statistics::PauseStatistics;

/// Orchestrates stop/start cycles over the threads of a [`ThreadRegistry`].
///
/// Only one pause can be in progress at a time: `stop_world` takes the allocation
/// lock and the returned [`StoppedWorld`] holds it until the world is restarted.
pub struct SuspendCoordinator<B: SignalBackend> {
    world: Arc<World>,
    registry: Arc<ThreadRegistry>,
    backend: B,
    options: Options,
    /// Threads currently building a free list. Must be zero when a pause begins.
    free_list_builders: AtomicUsize,
    last_pause: spin::Mutex<Option<PauseStatistics>>,
}

impl<B: SignalBackend> SuspendCoordinator<B> {
    /// Create a coordinator. The handlers that `backend` delivers to must use the
    /// same `world`.
    pub fn new(
        world: Arc<World>,
        registry: Arc<ThreadRegistry>,
        backend: B,
        options: Options,
    ) -> Self {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("Initialized the logger."),
            Err(_) => debug!("Failed to initialize the logger. Possibly a logger has been initialized by the runtime."),
        }
        debug!("Stop-the-world options: {:?}", options);
        SuspendCoordinator {
            world,
            registry,
            backend,
            options,
            free_list_builders: AtomicUsize::new(0),
            last_pause: spin::Mutex::new(None),
        }
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Statistics of the last completed pause.
    pub fn last_pause(&self) -> Option<PauseStatistics> {
        self.last_pause.lock().clone()
    }

    /// Mark the calling thread as building a free list until the guard is dropped.
    /// The world cannot be stopped meanwhile.
    pub fn begin_free_list_build(&self) -> FreeListBuild<'_> {
        self.free_list_builders.fetch_add(1, Ordering::SeqCst);
        FreeListBuild {
            builders: &self.free_list_builders,
        }
    }

    /// Suspend every registered thread other than the caller.
    ///
    /// When this returns, every live thread that is not in a blocking region has
    /// acknowledged the new epoch, published its stack pointer and is parked. Blocked
    /// threads published their stack pointer when they entered the blocking region.
    /// The allocation lock is held until the returned token is restarted or dropped.
    pub fn stop_world(&self) -> StoppedWorld<'_, B> {
        let started = Instant::now();
        let guard = self.registry.lock();

        let builders = self.free_list_builders.load(Ordering::SeqCst);
        assert_eq!(
            builders, 0,
            "stop_world() while {} thread(s) are building a free list",
            builders
        );

        self.world.transition(WorldState::Running);
        // Acknowledgments of an earlier epoch that arrived after it was restarted.
        let stale = self.world.suspend_ack.drain() + self.world.resume_ack.drain();
        if stale != 0 {
            trace!("Drained {} stale acknowledgment(s)", stale);
        }
        let epoch = self.world.advance_epoch();
        let mut stats = PauseStatistics::new(epoch);
        stats.duplicate_deliveries = self.world.take_duplicate_deliveries();

        let me = current_thread();
        if let Some(me) = me {
            me.publish_stack_pointer(stack::flush_to_stack());
        }
        let my_id = me.map(|t| t.id());
        debug!("stop_world: epoch {}, {} registered thread(s)", epoch, guard.len());

        let mut pending: Vec<Arc<MutatorThread>> = vec![];
        guard.for_each_live(|t| {
            if Some(t.id()) == my_id || t.last_stop_count() == epoch {
                return;
            }
            if t.is_blocked() {
                stats.blocked_threads += 1;
                return;
            }
            pending.push(t.clone());
        });

        pending.retain(|t| self.signal(t, GcSignal::Suspend, &mut stats));
        stats.signals_sent[GcSignal::Suspend] = pending.len();
        self.wait_for_suspend(epoch, &mut pending, &mut stats);

        // Each thread posts once after it sets its epoch, so a post can still be in
        // flight for a thread we already saw.
        let acked = guard
            .threads()
            .filter(|t| Some(t.id()) != my_id && t.last_stop_count() == epoch)
            .count();
        while stats.suspend_acks < acked {
            self.world.suspend_ack.wait();
            stats.suspend_acks += 1;
        }

        stats.acknowledged = guard
            .threads()
            .filter(|t| t.is_suspended() && t.last_stop_count() == epoch)
            .count();
        stats.stop_time = started.elapsed();
        self.world.transition(WorldState::Stopping);
        debug!(
            "stop_world: epoch {} stopped {} thread(s) in {:?}",
            epoch, stats.acknowledged, stats.stop_time
        );

        StoppedWorld {
            coordinator: self,
            guard,
            my_id,
            stats,
            started,
            restarted: false,
        }
    }

    /// Send one signal. Returns false if the thread is gone.
    fn signal(&self, t: &MutatorThread, signal: GcSignal, stats: &mut PauseStatistics) -> bool {
        trace!("Send {} to {:?}", signal, t.id());
        match self.backend.send(t, signal) {
            Ok(()) => true,
            Err(SendError::NoSuchThread) => {
                debug!("{:?} is gone, not waiting for its {} acknowledgment", t.id(), signal);
                stats.threads_gone += 1;
                false
            }
            Err(SendError::Os(e)) => {
                gc_fatal!("Failed to send {} to {:?}: {}", signal, t.id(), e)
            }
        }
    }

    /// Wait until every thread in `pending` acknowledged `epoch`.
    ///
    /// The semaphore only wakes us up. Completion is decided by each thread's
    /// `last_stop_count`, so an acknowledgment posted by a stale signal can never
    /// stand in for a thread that has not stopped yet.
    fn wait_for_suspend(
        &self,
        epoch: u64,
        pending: &mut Vec<Arc<MutatorThread>>,
        stats: &mut PauseStatistics,
    ) {
        let mut last_send = Instant::now();
        loop {
            pending.retain(|t| t.last_stop_count() != epoch);
            if pending.is_empty() {
                return;
            }
            if !self.options.retry_signals {
                self.world.suspend_ack.wait();
                stats.suspend_acks += 1;
                continue;
            }
            if self.world.suspend_ack.wait_timeout(self.options.wait_unit()) {
                stats.suspend_acks += 1;
                continue;
            }
            if last_send.elapsed() < self.options.retry_interval() {
                continue;
            }
            pending.retain(|t| t.last_stop_count() != epoch);
            debug!(
                "stop_world: {} thread(s) did not acknowledge epoch {} within {:?}, resending",
                pending.len(),
                epoch,
                self.options.retry_interval()
            );
            pending.retain(|t| {
                let delivered = self.signal(t, GcSignal::Suspend, stats);
                if delivered {
                    stats.resends[GcSignal::Suspend] += 1;
                }
                delivered
            });
            last_send = Instant::now();
        }
    }

    /// Resume every thread parked for the epoch of `stopped`, and wait until each one
    /// left its handler.
    fn restart(&self, stopped: &mut StoppedWorld<'_, B>) {
        let epoch = stopped.stats.epoch;
        self.world.transition(WorldState::Stopped);
        self.world.begin_resume(epoch);

        let my_id = stopped.my_id;
        let stats = &mut stopped.stats;
        // Suspended for this epoch is the only criterion. Blocked threads and
        // finished threads are only here if a signal reached them first.
        let mut parked: Vec<Arc<MutatorThread>> = stopped
            .guard
            .threads()
            .filter(|t| Some(t.id()) != my_id)
            .filter(|t| t.is_suspended() && t.last_stop_count() == epoch)
            .cloned()
            .collect();
        parked.retain(|t| self.signal(t, GcSignal::Resume, stats));
        stats.signals_sent[GcSignal::Resume] = parked.len();

        let mut last_send = Instant::now();
        loop {
            parked.retain(|t| t.is_suspended());
            if parked.is_empty() {
                break;
            }
            if !self.options.retry_signals {
                self.world.resume_ack.wait();
                continue;
            }
            if self.world.resume_ack.wait_timeout(self.options.wait_unit()) {
                continue;
            }
            if last_send.elapsed() < self.options.retry_interval() {
                continue;
            }
            // Resend only where the RESUME itself was lost. A thread with the latch set
            // is on its way out of the handler.
            parked.retain(|t| {
                if t.resume_received() {
                    return true;
                }
                let delivered = self.signal(t, GcSignal::Resume, stats);
                if delivered {
                    stats.resends[GcSignal::Resume] += 1;
                }
                delivered
            });
            last_send = Instant::now();
        }

        self.world.transition(WorldState::Starting);
        stats.pause_time = stopped.started.elapsed();
        stats.report(self.options.verbose);
        *self.last_pause.lock() = Some(stats.clone());
    }
}

impl SuspendCoordinator<PosixSignals> {
    /// Create a coordinator that stops threads with real POSIX signals, installing
    /// the signal handlers for a fresh [`World`].
    pub fn with_posix_signals(
        registry: Arc<ThreadRegistry>,
        options: Options,
    ) -> Result<Self, SignalInstallError> {
        let world = Arc::new(World::new());
        let backend = PosixSignals::install(world.clone(), &options)?;
        Ok(Self::new(world, registry, backend, options))
    }
}

/// Marks a free list under construction. See [`SuspendCoordinator::begin_free_list_build`].
pub struct FreeListBuild<'a> {
    builders: &'a AtomicUsize,
}

impl Drop for FreeListBuild<'_> {
    fn drop(&mut self) {
        self.builders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Proof that the world is stopped. Holds the allocation lock.
///
/// Dereferences to the locked registry, so a stack scanner can walk
/// [`RegistryGuard::for_each_live`] and read each thread's published stack pointer.
/// Consume it with [`StoppedWorld::start_world`]. Dropping it restarts the world too.
pub struct StoppedWorld<'a, B: SignalBackend> {
    coordinator: &'a SuspendCoordinator<B>,
    guard: RegistryGuard<'a>,
    my_id: Option<ThreadId>,
    stats: PauseStatistics,
    started: Instant,
    restarted: bool,
}

impl<B: SignalBackend> StoppedWorld<'_, B> {
    pub fn epoch(&self) -> u64 {
        self.stats.epoch
    }

    /// The number of threads parked for this epoch.
    pub fn acknowledged(&self) -> usize {
        self.stats.acknowledged
    }

    /// Statistics of this pause so far.
    pub fn statistics(&self) -> &PauseStatistics {
        &self.stats
    }

    /// Resume all threads and release the allocation lock.
    pub fn start_world(mut self) {
        self.restart();
    }

    fn restart(&mut self) {
        if !self.restarted {
            self.restarted = true;
            let coordinator = self.coordinator;
            coordinator.restart(self);
        }
    }
}

impl<'a, B: SignalBackend> Deref for StoppedWorld<'a, B> {
    type Target = RegistryGuard<'a>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<B: SignalBackend> Drop for StoppedWorld<'_, B> {
    fn drop(&mut self) {
        if !self.restarted {
            warn!(
                "World stopped at epoch {} was dropped without start_world(). Restarting.",
                self.stats.epoch
            );
            self.restart();
        }
    }
}
