//! Utilities shared by the stop-the-world protocol and the promotion engine.

/// Address and object reference types.
pub mod address;
/// Constants for sizes.
pub mod constants;
/// Alignment helpers.
pub mod conversions;
/// Abort paths for protocol violations.
#[macro_use]
pub mod fatal;
/// Logger initialization.
pub mod logger;
/// Options, configurable through environment variables.
pub mod options;
/// Thin wrappers around libc calls.
pub mod os;
/// A counting semaphore that can be posted from a signal handler.
pub mod semaphore;
/// Register flushing and stack pointer snapshots.
pub mod stack;
/// Per-pause statistics.
pub mod statistics;

#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
