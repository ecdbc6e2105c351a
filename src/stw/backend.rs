use std::fmt;

use enum_map::Enum;

use crate::thread::MutatorThread;

/// The two signals of the stop-the-world handshake.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, strum_macros::Display, strum_macros::EnumIter,
)]
pub enum GcSignal {
    /// Ask a thread to publish its stack pointer and park.
    #[strum(serialize = "SUSPEND")]
    Suspend,
    /// Let a parked thread continue.
    #[strum(serialize = "RESUME")]
    Resume,
}

/// Why a signal could not be delivered.
#[derive(Debug)]
pub enum SendError {
    /// The target thread no longer exists (`ESRCH`). The coordinator tolerates this.
    NoSuchThread,
    /// Any other failure. The coordinator treats this as fatal.
    Os(std::io::Error),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NoSuchThread => write!(f, "no such thread"),
            SendError::Os(e) => write!(f, "signal delivery failed: {}", e),
        }
    }
}

impl std::error::Error for SendError {}

impl From<std::io::Error> for SendError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ESRCH) => SendError::NoSuchThread,
            _ => SendError::Os(e),
        }
    }
}

/// How the coordinator delivers SUSPEND and RESUME to a mutator thread.
///
/// Delivery is asynchronous: `send` returns once the signal is queued. The handlers
/// on the receiving side ([`crate::stw::handshake`]) acknowledge through the
/// semaphores of the shared [`crate::stw::World`].
pub trait SignalBackend: Send + Sync {
    fn send(&self, target: &MutatorThread, signal: GcSignal) -> Result<(), SendError>;
}
