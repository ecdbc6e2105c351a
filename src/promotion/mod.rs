//! Object promotion: copying a live object, rebasing its interior pointer,
//! installing a forwarding pointer and scheduling the copy for tracing.
//!
//! An object is a header word followed by its body. See [`header`] for the header
//! encoding and [`TypeDescriptor`] for how sizes and reference slots are described.

mod descriptor;
mod engine;
mod forwarding;
mod gray_queue;
pub mod header;
mod space;

pub use self::descriptor::{ObjectLayout, ReferenceMap, TypeDescriptor};
pub use self::engine::{is_forwarded, is_pinned, read_forwarding_pointer, resolve, PromotionEngine};
pub use self::forwarding::{ForwardingAttempt, LostForwardingAttempt, WonForwardingAttempt};
pub use self::gray_queue::{GrayQueue, GrayQueueEntry, LocalGrayQueue, SharedGrayQueue};
pub use self::header::{header_tag, HeaderTag};
pub use self::space::{BumpSpace, CopySpace};
