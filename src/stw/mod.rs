//! The stop-the-world handshake.
//!
//! The [`SuspendCoordinator`] increments the stop epoch and sends SUSPEND to every
//! registered thread that has not acknowledged it. Each thread runs
//! [`handshake::suspend_handler`], publishes its stack pointer, acknowledges once
//! through a semaphore and parks until RESUME. Delivery goes through a
//! [`SignalBackend`], which is [`PosixSignals`] in production.

mod backend;
mod coordinator;
pub mod handshake;
mod posix;
mod world;

pub use self::backend::{GcSignal, SendError, SignalBackend};
pub use self::coordinator::{FreeListBuild, StoppedWorld, SuspendCoordinator};
pub use self::posix::{PosixSignals, SignalInstallError};
pub use self::world::{World, WorldState};
