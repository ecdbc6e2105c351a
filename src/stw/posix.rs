//! Real signal delivery with `pthread_kill`, handlers installed with `sigaction`,
//! and parking with `sigsuspend`.
//!
//! Signal dispositions are process-wide, so the handlers are installed once per
//! process and the state they need is leaked for the lifetime of the process.

use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use libc::c_int;

use crate::stw::backend::{GcSignal, SendError, SignalBackend};
use crate::stw::handshake;
use crate::stw::World;
use crate::thread::{current_thread, MutatorThread};
use crate::util::options::Options;
use crate::util::os::{wrap_libc_call, wrap_pthread_call};

/// Errors from installing the signal handlers.
#[derive(Debug)]
pub enum SignalInstallError {
    /// The handlers were already installed in this process.
    AlreadyInstalled,
    /// SUSPEND and RESUME must be different signals.
    SameSignal(c_int),
    /// The hosting process already handles this signal.
    Reserved(c_int),
    /// `sigaction` or a signal set operation failed.
    Os(std::io::Error),
}

impl fmt::Display for SignalInstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalInstallError::AlreadyInstalled => write!(f, "signal handlers already installed"),
            SignalInstallError::SameSignal(sig) => {
                write!(f, "SUSPEND and RESUME both use signal {}", sig)
            }
            SignalInstallError::Reserved(sig) => {
                write!(f, "signal {} is already handled by the process", sig)
            }
            SignalInstallError::Os(e) => write!(f, "failed to install signal handlers: {}", e),
        }
    }
}

impl std::error::Error for SignalInstallError {}

impl From<std::io::Error> for SignalInstallError {
    fn from(e: std::io::Error) -> Self {
        SignalInstallError::Os(e)
    }
}

/// What the handlers need. Leaked on installation.
struct PosixShared {
    world: Arc<World>,
    suspend_signal: c_int,
    resume_signal: c_int,
    /// Everything blocked except RESUME and the signals we never want to defer.
    park_mask: libc::sigset_t,
}

static INSTALLED: AtomicPtr<PosixShared> = AtomicPtr::new(std::ptr::null_mut());

fn installed() -> Option<&'static PosixShared> {
    unsafe { INSTALLED.load(Ordering::Acquire).as_ref() }
}

/// Signals that stay deliverable while a thread is parked or inside a handler, so a
/// stopped process can still be interrupted, terminated or crash visibly.
const ALWAYS_ALLOWED: [c_int; 6] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGABRT,
    libc::SIGTERM,
    libc::SIGSEGV,
    libc::SIGBUS,
];

/// The signal backend for real threads.
#[derive(Clone, Copy)]
pub struct PosixSignals {
    shared: &'static PosixShared,
}

impl PosixSignals {
    /// Install the SUSPEND and RESUME handlers for `world`, with the signal numbers
    /// from `options`. Only one installation per process is allowed.
    pub fn install(world: Arc<World>, options: &Options) -> Result<Self, SignalInstallError> {
        let suspend_signal = options.suspend_signal;
        let resume_signal = options.resume_signal;
        if suspend_signal == resume_signal {
            return Err(SignalInstallError::SameSignal(suspend_signal));
        }
        if installed().is_some() {
            return Err(SignalInstallError::AlreadyInstalled);
        }
        for sig in [suspend_signal, resume_signal] {
            if is_reserved(sig)? {
                return Err(SignalInstallError::Reserved(sig));
            }
        }

        let handler_mask = unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            let mask_ptr: *mut libc::sigset_t = &mut mask;
            wrap_libc_call(&|| libc::sigfillset(mask_ptr), 0)?;
            for sig in ALWAYS_ALLOWED {
                wrap_libc_call(&|| libc::sigdelset(mask_ptr, sig), 0)?;
            }
            mask
        };
        let park_mask = unsafe {
            let mut mask = handler_mask;
            let mask_ptr: *mut libc::sigset_t = &mut mask;
            wrap_libc_call(&|| libc::sigdelset(mask_ptr, resume_signal), 0)?;
            mask
        };

        let shared: &'static PosixShared = Box::leak(Box::new(PosixShared {
            world,
            suspend_signal,
            resume_signal,
            park_mask,
        }));
        let shared_ptr = shared as *const PosixShared as *mut PosixShared;
        if INSTALLED
            .compare_exchange(
                std::ptr::null_mut(),
                shared_ptr,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // Lost an installation race. The loser's state was never published.
            drop(unsafe { Box::from_raw(shared_ptr) });
            return Err(SignalInstallError::AlreadyInstalled);
        }

        set_handler(suspend_signal, suspend_signal_handler, handler_mask)?;
        set_handler(resume_signal, resume_signal_handler, handler_mask)?;
        info!(
            "Installed stop-the-world handlers: SUSPEND={}, RESUME={}",
            suspend_signal, resume_signal
        );
        Ok(PosixSignals { shared })
    }

    /// The backend installed in this process, if any.
    pub fn get() -> Option<Self> {
        installed().map(|shared| PosixSignals { shared })
    }

    pub fn world(&self) -> &Arc<World> {
        &self.shared.world
    }

    pub fn suspend_signal(&self) -> c_int {
        self.shared.suspend_signal
    }

    pub fn resume_signal(&self) -> c_int {
        self.shared.resume_signal
    }

    fn signal_number(&self, signal: GcSignal) -> c_int {
        match signal {
            GcSignal::Suspend => self.shared.suspend_signal,
            GcSignal::Resume => self.shared.resume_signal,
        }
    }
}

impl SignalBackend for PosixSignals {
    fn send(&self, target: &MutatorThread, signal: GcSignal) -> Result<(), SendError> {
        let sig = self.signal_number(signal);
        // The target must not have been joined: pthread_kill on a reaped thread is
        // undefined. Threads unregister before they exit, so a registered thread is
        // at worst exiting, which reports ESRCH.
        wrap_pthread_call(&|| unsafe { libc::pthread_kill(target.native(), sig) })
            .map_err(SendError::from)
    }
}

/// A signal is reserved if the process installed anything other than the default
/// or ignore disposition for it.
fn is_reserved(sig: c_int) -> Result<bool, SignalInstallError> {
    let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
    let old_ptr: *mut libc::sigaction = &mut old;
    wrap_libc_call(
        &|| unsafe { libc::sigaction(sig, std::ptr::null(), old_ptr) },
        0,
    )?;
    Ok(old.sa_sigaction != libc::SIG_DFL && old.sa_sigaction != libc::SIG_IGN)
}

fn set_handler(
    sig: c_int,
    handler: extern "C" fn(c_int),
    mask: libc::sigset_t,
) -> Result<(), SignalInstallError> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handler as usize;
    action.sa_mask = mask;
    action.sa_flags = libc::SA_RESTART;
    let action_ptr: *const libc::sigaction = &action;
    wrap_libc_call(
        &|| unsafe { libc::sigaction(sig, action_ptr, std::ptr::null_mut()) },
        0,
    )?;
    Ok(())
}

/// Run `f` without clobbering the interrupted code's `errno`.
fn preserving_errno<F: FnOnce()>(f: F) {
    let saved = unsafe { *libc::__errno_location() };
    f();
    unsafe { *libc::__errno_location() = saved };
}

extern "C" fn suspend_signal_handler(_sig: c_int) {
    preserving_errno(|| {
        let (Some(shared), Some(me)) = (installed(), current_thread()) else {
            // Not a registered thread, or a stale signal after unregistration.
            return;
        };
        handshake::suspend_handler(&shared.world, me, || unsafe {
            libc::sigsuspend(&shared.park_mask);
        });
    })
}

extern "C" fn resume_signal_handler(_sig: c_int) {
    preserving_errno(|| {
        if let (Some(shared), Some(me)) = (installed(), current_thread()) {
            handshake::resume_handler(&shared.world, me);
        }
    })
}
