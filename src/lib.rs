//! Quiesce is the stop-the-world and promotion core of a tracing garbage collector.
//!
//! It provides two tightly coupled mechanisms:
//!
//! * [`stw::SuspendCoordinator`] quiesces every registered mutator thread with a
//!   signal-based handshake, so that the collector can inspect and move memory.
//!   Each suspended thread publishes a conservative stack pointer before it parks.
//! * [`promotion::PromotionEngine`] relocates one live object, rebases its interior
//!   pointer, installs a forwarding pointer in the old header and schedules the copy
//!   for tracing. When the target space is full, the object is pinned instead.
//!
//! The copy routine is only correct inside a window guaranteed by the suspension
//! protocol (or under a per-object claim, see [`promotion::ForwardingAttempt`]).
//!
//! A minimal pause looks like this:
//!
//! ```ignore
//! let world = coordinator.stop_world();
//! for obj in roots {
//!     engine.copy_object(obj, &mut to_space, &mut gray_queue);
//! }
//! world.start_world();
//! ```

#[cfg(any(test, feature = "mock_test"))]
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

#[macro_use]
pub mod util;
pub mod promotion;
pub mod stw;
pub mod thread;

#[cfg(test)]
mod tests;

pub use crate::promotion::PromotionEngine;
pub use crate::stw::SuspendCoordinator;
pub use crate::thread::{MutatorThread, ThreadRegistry};
pub use crate::util::{Address, ObjectReference};
