use super::*;
use crate::stw::{GcSignal, WorldState};
use crate::util::test_util::panic_after;

fn assert_all_stopped(runtime: &MockRuntime, epoch: u64) {
    for t in runtime.mutators() {
        assert_eq!(t.last_stop_count(), epoch, "{:?}", t);
        assert!(t.is_suspended(), "{:?}", t);
        let (low, base) = t.stack_bounds();
        let (sp, scan_end) = t.scan_range().expect("no stack pointer published");
        assert_eq!(scan_end, base);
        assert!(low <= sp && sp < base, "{} outside [{}, {})", sp, low, base);
    }
}

#[test]
fn stop_and_start_four_threads() {
    panic_after(10_000, || {
        let runtime = MockRuntime::with_mutators(4, no_retry());
        let before = runtime.world.epoch();

        let stopped = runtime.coordinator.stop_world();
        assert_eq!(stopped.epoch(), before + 1);
        assert_eq!(runtime.world.epoch(), before + 1);
        assert_eq!(stopped.acknowledged(), 4);
        assert_eq!(stopped.statistics().suspend_acks, 4);
        assert_eq!(runtime.world.pending_suspend_acks(), 0);
        assert_eq!(runtime.world.state(), WorldState::Stopped);
        assert_all_stopped(&runtime, stopped.epoch());
        stopped.start_world();

        assert_eq!(runtime.world.state(), WorldState::Running);
        for t in runtime.mutators() {
            assert!(!t.is_suspended());
        }
        let stats = runtime.coordinator.last_pause().unwrap();
        assert_eq!(stats.signals_sent[GcSignal::Suspend], 4);
        assert_eq!(stats.signals_sent[GcSignal::Resume], 4);
        assert_eq!(stats.threads_gone, 0);
    })
}

#[test]
fn stop_without_threads() {
    let runtime = MockRuntime::new(no_retry());
    let stopped = runtime.coordinator.stop_world();
    assert_eq!(stopped.epoch(), 1);
    assert_eq!(stopped.acknowledged(), 0);
    assert!(stopped.is_empty());
    stopped.start_world();
    assert_eq!(runtime.world.state(), WorldState::Running);
}

#[test]
fn every_thread_acknowledges_the_current_epoch() {
    panic_after(20_000, || {
        for n in [1, 2, 5, 16] {
            let runtime = MockRuntime::with_mutators(n, fast_retry());
            let stopped = runtime.coordinator.stop_world();
            assert_eq!(stopped.acknowledged(), n);
            assert_eq!(stopped.statistics().suspend_acks, n);
            assert_all_stopped(&runtime, stopped.epoch());
            let mut live = 0;
            stopped.for_each_live(|t| {
                assert!(t.stack_pointer().is_some());
                live += 1;
            });
            assert_eq!(live, n);
            stopped.start_world();
        }
    })
}

#[test]
fn epoch_advances_once_per_cycle() {
    panic_after(20_000, || {
        let runtime = MockRuntime::with_mutators(3, fast_retry());
        for cycle in 1..=10u64 {
            let stopped = runtime.coordinator.stop_world();
            assert_eq!(stopped.epoch(), cycle);
            assert_all_stopped(&runtime, cycle);
            stopped.start_world();
        }
        for t in runtime.mutators() {
            assert_eq!(runtime.signals.sent(t.id(), GcSignal::Suspend), 10);
            assert_eq!(runtime.signals.sent(t.id(), GcSignal::Resume), 10);
        }
    })
}

#[test]
fn coordinator_does_not_signal_itself() {
    panic_after(10_000, || {
        let runtime = MockRuntime::with_mutators(2, no_retry());
        // The caller has no mailbox, so a signal to it would come back as ESRCH.
        let me = runtime.registry.register_current();
        let stopped = runtime.coordinator.stop_world();
        assert_eq!(stopped.acknowledged(), 2);
        assert_eq!(stopped.statistics().threads_gone, 0);
        assert_eq!(stopped.len(), 3);
        assert!(me.stack_pointer().is_some());
        assert!(!me.is_suspended());
        stopped.start_world();
        runtime.registry.unregister_current();
    })
}

#[test]
fn dropping_the_token_restarts_the_world() {
    panic_after(10_000, || {
        let runtime = MockRuntime::with_mutators(2, no_retry());
        {
            let stopped = runtime.coordinator.stop_world();
            assert_eq!(stopped.acknowledged(), 2);
        }
        assert_eq!(runtime.world.state(), WorldState::Running);
        for t in runtime.mutators() {
            assert!(!t.is_suspended());
        }
        assert_eq!(runtime.coordinator.last_pause().unwrap().epoch, 1);
        // The allocation lock was released.
        assert_eq!(runtime.registry.len(), 2);
    })
}
