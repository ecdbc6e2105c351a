//! Stop and restart real spinning threads with POSIX signals. Signal handlers are
//! process-wide, so everything runs in a single test.
#![cfg(target_os = "linux")]

extern crate quiesce;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use quiesce::stw::{PosixSignals, SignalInstallError, SuspendCoordinator, World};
use quiesce::thread::ThreadRegistry;
use quiesce::util::options::Options;

const MUTATORS: usize = 4;
const CYCLES: u64 = 5;

fn wait_until<F: FnMut() -> bool>(mut cond: F) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < Duration::from_secs(10), "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn stop_and_restart_spinning_threads() {
    let registry = Arc::new(ThreadRegistry::new());
    let mut options = Options::builtin();
    options.retry_interval_us = 20_000;
    let coordinator = SuspendCoordinator::with_posix_signals(registry.clone(), options.clone())
        .expect("failed to install signal handlers");
    assert!(matches!(
        PosixSignals::install(Arc::new(World::new()), &options),
        Err(SignalInstallError::AlreadyInstalled)
    ));

    let done = Arc::new(AtomicBool::new(false));
    let counters: Arc<Vec<AtomicU64>> = Arc::new((0..MUTATORS).map(|_| AtomicU64::new(0)).collect());
    let (ready_tx, ready_rx) = mpsc::channel();
    let spinners: Vec<_> = (0..MUTATORS)
        .map(|i| {
            let registry = registry.clone();
            let done = done.clone();
            let counters = counters.clone();
            let ready_tx = ready_tx.clone();
            thread::spawn(move || {
                let me = registry.register_current();
                ready_tx.send(me).unwrap();
                while !done.load(Ordering::Relaxed) {
                    counters[i].fetch_add(1, Ordering::Relaxed);
                    std::hint::spin_loop();
                }
                registry.unregister_current();
            })
        })
        .collect();

    // One more thread sits in a blocking region the whole time.
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = {
        let registry = registry.clone();
        let ready_tx = ready_tx.clone();
        thread::spawn(move || {
            let me = registry.register_current();
            ready_tx.send(me).unwrap();
            registry.do_blocking(|| release_rx.recv().unwrap());
            registry.unregister_current();
        })
    };
    let threads: Vec<_> = (0..=MUTATORS).map(|_| ready_rx.recv().unwrap()).collect();
    let blocked = threads[MUTATORS].clone();
    wait_until(|| blocked.is_blocked());
    wait_until(|| counters.iter().all(|c| c.load(Ordering::Relaxed) > 0));

    for cycle in 1..=CYCLES {
        let stopped = coordinator.stop_world();
        assert_eq!(stopped.epoch(), cycle);
        assert_eq!(stopped.acknowledged(), MUTATORS);
        assert_eq!(stopped.statistics().blocked_threads, 1);

        let frozen: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        let mut scanned = 0;
        stopped.for_each_live(|t| {
            let (sp, base) = t.scan_range().expect("no stack pointer");
            assert!(sp < base);
            scanned += 1;
        });
        assert_eq!(scanned, MUTATORS + 1);
        for t in threads.iter().take(MUTATORS) {
            assert!(t.is_suspended());
            assert_eq!(t.last_stop_count(), cycle);
        }
        assert!(!blocked.is_suspended());

        thread::sleep(Duration::from_millis(10));
        let still: Vec<u64> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(frozen, still, "a mutator ran while the world was stopped");

        stopped.start_world();
        for t in threads.iter() {
            assert!(!t.is_suspended());
        }
        wait_until(|| {
            counters
                .iter()
                .zip(frozen.iter())
                .all(|(c, f)| c.load(Ordering::Relaxed) > *f)
        });
    }

    let stats = coordinator.last_pause().unwrap();
    assert_eq!(stats.epoch, CYCLES);
    assert_eq!(stats.threads_gone, 0);

    done.store(true, Ordering::Relaxed);
    release_tx.send(()).unwrap();
    for s in spinners {
        s.join().unwrap();
    }
    blocker.join().unwrap();
    assert!(registry.is_empty());
}
