//! Registered mutator threads.

mod mutator;
mod registry;

pub use self::mutator::MutatorThread;
pub use self::registry::{current_thread, RegistryGuard, ThreadRegistry};
