//! Protocol tests against the mailbox backend. Every mock mutator is a real thread
//! that registers itself and runs the real handlers, so only the delivery mechanism
//! is simulated.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::stw::{SuspendCoordinator, World};
use crate::thread::{MutatorThread, ThreadRegistry};
use crate::util::options::Options;
use crate::util::test_util::mock_signals::MailboxSignals;

mod mock_test_stop_world;

pub(crate) struct MockRuntime {
    pub world: Arc<World>,
    pub registry: Arc<ThreadRegistry>,
    pub signals: MailboxSignals,
    pub coordinator: SuspendCoordinator<MailboxSignals>,
    mutators: Vec<MockMutator>,
}

struct MockMutator {
    thread: Arc<MutatorThread>,
    handle: Option<JoinHandle<()>>,
}

impl MockRuntime {
    pub fn new(options: Options) -> Self {
        let world = Arc::new(World::new());
        let registry = Arc::new(ThreadRegistry::new());
        let signals = MailboxSignals::new();
        let coordinator =
            SuspendCoordinator::new(world.clone(), registry.clone(), signals.clone(), options);
        MockRuntime {
            world,
            registry,
            signals,
            coordinator,
            mutators: vec![],
        }
    }

    pub fn with_mutators(n: usize, options: Options) -> Self {
        let mut runtime = Self::new(options);
        for _ in 0..n {
            runtime.spawn_mutator();
        }
        runtime
    }

    /// Spawn a thread that registers itself and handles signals from its mailbox.
    pub fn spawn_mutator(&mut self) -> Arc<MutatorThread> {
        let (tx, rx) = mpsc::channel();
        let world = self.world.clone();
        let registry = self.registry.clone();
        let signals = self.signals.clone();
        let handle = thread::spawn(move || {
            signals.attach(thread::current().id());
            let me = registry.register_current();
            tx.send(me.clone()).unwrap();
            signals.run_mutator(&world, &me);
            registry.unregister_current();
        });
        let thread = rx.recv().unwrap();
        self.mutators.push(MockMutator {
            thread: thread.clone(),
            handle: Some(handle),
        });
        thread
    }

    pub fn mutator(&self, i: usize) -> &Arc<MutatorThread> {
        &self.mutators[i].thread
    }

    pub fn mutators(&self) -> impl Iterator<Item = &Arc<MutatorThread>> {
        self.mutators.iter().map(|m| &m.thread)
    }
}

impl Drop for MockRuntime {
    fn drop(&mut self) {
        for m in self.mutators.iter_mut() {
            self.signals.shutdown(m.thread.id());
            if let Some(handle) = m.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Retry quickly, so lost signals are recovered within a test's time limit.
pub(crate) fn fast_retry() -> Options {
    let mut options = Options::builtin();
    options.retry_signals = true;
    options.retry_interval_us = 5_000;
    options.wait_unit_us = 500;
    options
}

pub(crate) fn no_retry() -> Options {
    let mut options = Options::builtin();
    options.retry_signals = false;
    options
}

/// Poll `cond` until it holds, or fail after `timeout`.
pub(crate) fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < timeout, "Condition not met in {:?}", timeout);
        thread::sleep(Duration::from_millis(1));
    }
}
