//! A signal backend for tests. Each mock mutator thread owns a mailbox, and runs the
//! real handshake handlers whenever a "signal" is taken out of it. The backend can
//! lose, duplicate and bounce deliveries, so the coordinator's retry and ESRCH
//! paths can be exercised without real signals.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

use enum_map::EnumMap;

use crate::stw::handshake;
use crate::stw::{GcSignal, SendError, SignalBackend, World};
use crate::thread::MutatorThread;

#[derive(Clone, Default)]
pub struct MailboxSignals {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    lock: Mutex<State>,
    cvar: Condvar,
}

#[derive(Default)]
struct State {
    mailboxes: HashMap<ThreadId, Mailbox>,
}

#[derive(Default)]
struct Mailbox {
    queue: VecDeque<GcSignal>,
    /// Calls to `send`, including lost deliveries.
    sent: EnumMap<GcSignal, usize>,
    /// The next n deliveries of a kind are silently lost.
    drop_next: EnumMap<GcSignal, usize>,
    /// The next n deliveries of a kind arrive twice.
    duplicate_next: EnumMap<GcSignal, usize>,
    /// The thread is gone. `send` reports ESRCH.
    gone: bool,
    /// Ask the mutator loop to return.
    shutdown: bool,
}

impl MailboxSignals {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_mailbox<R>(&self, id: ThreadId, f: impl FnOnce(&mut Mailbox) -> R) -> R {
        let mut state = self.state();
        let mailbox = state
            .mailboxes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("{:?} has no mailbox", id));
        let result = f(mailbox);
        self.inner.cvar.notify_all();
        result
    }

    /// Create the mailbox of a thread. Sends to a thread without a mailbox report ESRCH.
    pub fn attach(&self, id: ThreadId) {
        self.state().mailboxes.insert(id, Mailbox::default());
    }

    /// Lose the next `n` deliveries of `signal` to `id`.
    pub fn drop_next(&self, id: ThreadId, signal: GcSignal, n: usize) {
        self.with_mailbox(id, |m| m.drop_next[signal] += n);
    }

    /// Deliver the next `n` sends of `signal` to `id` twice.
    pub fn duplicate_next(&self, id: ThreadId, signal: GcSignal, n: usize) {
        self.with_mailbox(id, |m| m.duplicate_next[signal] += n);
    }

    /// Make every later send to `id` fail with ESRCH, as if the thread had exited.
    pub fn kill(&self, id: ThreadId) {
        self.with_mailbox(id, |m| m.gone = true);
    }

    /// Ask the mutator loop of `id` to return once its mailbox is empty.
    pub fn shutdown(&self, id: ThreadId) {
        self.with_mailbox(id, |m| m.shutdown = true);
    }

    /// How many times `signal` was sent to `id`, lost deliveries included.
    pub fn sent(&self, id: ThreadId, signal: GcSignal) -> usize {
        self.state()
            .mailboxes
            .get(&id)
            .map_or(0, |m| m.sent[signal])
    }

    /// Signals delivered to `id` that its thread has not taken yet.
    pub fn pending(&self, id: ThreadId) -> usize {
        self.state()
            .mailboxes
            .get(&id)
            .map_or(0, |m| m.queue.len())
    }

    /// Deliver a signal to `id` directly, bypassing the coordinator.
    pub fn inject(&self, id: ThreadId, signal: GcSignal) {
        self.with_mailbox(id, |m| m.queue.push_back(signal));
    }

    /// The body of a mock mutator thread. Takes signals out of the mailbox of `me`
    /// and runs the handlers, until `shutdown` is called.
    pub fn run_mutator(&self, world: &World, me: &MutatorThread) {
        while let Some(signal) = self.next_signal(me.id()) {
            match signal {
                GcSignal::Suspend => handshake::suspend_handler(world, me, || {
                    // Only RESUME gets through while parked. Other signals stay queued.
                    self.wait_for_resume(me.id());
                    handshake::resume_handler(world, me);
                }),
                GcSignal::Resume => handshake::resume_handler(world, me),
            }
        }
    }

    fn next_signal(&self, id: ThreadId) -> Option<GcSignal> {
        let mut state = self.state();
        loop {
            let mailbox = state.mailboxes.get_mut(&id)?;
            if let Some(signal) = mailbox.queue.pop_front() {
                return Some(signal);
            }
            if mailbox.shutdown {
                return None;
            }
            state = self
                .inner
                .cvar
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn wait_for_resume(&self, id: ThreadId) {
        let mut state = self.state();
        loop {
            if let Some(mailbox) = state.mailboxes.get_mut(&id) {
                if let Some(i) = mailbox.queue.iter().position(|s| *s == GcSignal::Resume) {
                    mailbox.queue.remove(i);
                    return;
                }
            }
            state = self
                .inner
                .cvar
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl SignalBackend for MailboxSignals {
    fn send(&self, target: &MutatorThread, signal: GcSignal) -> Result<(), SendError> {
        let mut state = self.state();
        let Some(mailbox) = state.mailboxes.get_mut(&target.id()) else {
            return Err(SendError::NoSuchThread);
        };
        if mailbox.gone {
            return Err(SendError::NoSuchThread);
        }
        mailbox.sent[signal] += 1;
        if mailbox.drop_next[signal] > 0 {
            mailbox.drop_next[signal] -= 1;
            return Ok(());
        }
        mailbox.queue.push_back(signal);
        if mailbox.duplicate_next[signal] > 0 {
            mailbox.duplicate_next[signal] -= 1;
            mailbox.queue.push_back(signal);
        }
        self.inner.cvar.notify_all();
        Ok(())
    }
}
