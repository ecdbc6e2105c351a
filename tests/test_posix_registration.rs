//! Threads keep registering and unregistering while the world is stopped and
//! restarted with real signals and no resends. A thread that is in the table must be
//! able to acknowledge SUSPEND, or `stop_world()` would wait forever.
#![cfg(target_os = "linux")]

extern crate quiesce;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use quiesce::stw::SuspendCoordinator;
use quiesce::thread::ThreadRegistry;
use quiesce::util::options::Options;

const CHURNERS: usize = 4;
const CYCLES: u64 = 200;

#[test]
fn stop_world_while_threads_register() {
    let registry = Arc::new(ThreadRegistry::new());
    let mut options = Options::builtin();
    options.retry_signals = false;
    let coordinator = Arc::new(
        SuspendCoordinator::with_posix_signals(registry.clone(), options)
            .expect("failed to install signal handlers"),
    );

    let done = Arc::new(AtomicBool::new(false));
    let churners: Vec<_> = (0..CHURNERS)
        .map(|_| {
            let registry = registry.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut rounds = 0u64;
                while !done.load(Ordering::Relaxed) {
                    registry.register_current();
                    for _ in 0..rounds % 64 {
                        std::hint::spin_loop();
                    }
                    registry.unregister_current();
                    rounds += 1;
                }
                rounds
            })
        })
        .collect();

    let (cycle_tx, cycle_rx) = mpsc::channel();
    let stopper = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            for _ in 0..CYCLES {
                let stopped = coordinator.stop_world();
                let epoch = stopped.epoch();
                stopped.for_each_live(|t| {
                    assert_eq!(t.last_stop_count(), epoch, "{:?}", t);
                    assert!(t.is_suspended(), "{:?}", t);
                });
                stopped.start_world();
                cycle_tx.send(epoch).unwrap();
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    for cycle in 1..=CYCLES {
        let epoch = cycle_rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap_or_else(|_| panic!("stop_world() of cycle {} did not return", cycle));
        assert_eq!(epoch, cycle);
    }
    stopper.join().unwrap();

    done.store(true, Ordering::Relaxed);
    for churner in churners {
        assert!(churner.join().unwrap() > 0);
    }
    assert!(registry.is_empty());
}
