use std::fmt;
use std::time::Duration;

use enum_map::EnumMap;
use strum::IntoEnumIterator;

use crate::stw::GcSignal;

/// What happened during one stop/start cycle. Filled in by the coordinator, which is
/// the only writer while it holds the allocation lock.
#[derive(Clone, Debug, Default)]
pub struct PauseStatistics {
    /// The epoch of this pause.
    pub epoch: u64,
    /// Threads that acknowledged SUSPEND.
    pub acknowledged: usize,
    /// SUSPEND acknowledgments taken from the semaphore for this epoch.
    pub suspend_acks: usize,
    /// Signals sent in the first round, per kind.
    pub signals_sent: EnumMap<GcSignal, usize>,
    /// Signals re-sent after a retry interval, per kind.
    pub resends: EnumMap<GcSignal, usize>,
    /// Signals that found their thread already gone (ESRCH).
    pub threads_gone: usize,
    /// Stale or duplicate SUSPEND deliveries that handlers ignored since the last pause.
    pub duplicate_deliveries: usize,
    /// Threads skipped because they were in a blocking region.
    pub blocked_threads: usize,
    /// Time from the start of `stop_world` until every thread acknowledged.
    pub stop_time: Duration,
    /// Time from the start of `stop_world` until every thread acknowledged RESUME.
    pub pause_time: Duration,
}

impl PauseStatistics {
    pub fn new(epoch: u64) -> Self {
        PauseStatistics {
            epoch,
            ..Default::default()
        }
    }

    /// Log this pause. Verbose mode reports at the info level.
    pub fn report(&self, verbose: bool) {
        if verbose {
            info!("{}", self);
        } else {
            debug!("{}", self);
        }
    }
}

impl fmt::Display for PauseStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Pause #{}: {} threads stopped in {:?}, paused {:?};",
            self.epoch, self.acknowledged, self.stop_time, self.pause_time,
        )?;
        for signal in GcSignal::iter() {
            write!(
                f,
                " {} sent {} resent {},",
                signal, self.signals_sent[signal], self.resends[signal]
            )?;
        }
        write!(
            f,
            " {} gone, {} blocked, {} duplicate deliveries",
            self.threads_gone, self.blocked_threads, self.duplicate_deliveries,
        )
    }
}

/// Counters of a promotion engine, see [`crate::promotion::PromotionEngine::statistics`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PromotionStatistics {
    /// Objects copied.
    pub copied_objects: usize,
    /// Bytes allocated for copies, after alignment.
    pub copied_bytes: usize,
    /// Objects pinned because the target space was full.
    pub pinned_on_failure: usize,
    /// Objects currently in the pinned set.
    pub pinned_objects: usize,
}

impl fmt::Display for PromotionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "promoted {} objects ({} bytes), {} pinned ({} for lack of space)",
            self.copied_objects, self.copied_bytes, self.pinned_objects, self.pinned_on_failure
        )
    }
}
