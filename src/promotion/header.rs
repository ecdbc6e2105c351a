//! The object header: one word at the start of every object.
//!
//! A live object's header holds the address of its [`TypeDescriptor`] plus flag
//! bits. Once the object is copied, the header holds the address of the copy with
//! the [`FORWARDED`] bit set. Descriptors are 8-byte aligned, so the three low bits
//! are always free:
//!
//! ```text
//! live:      | descriptor address ... | PINNED | BEING_FORWARDED | 0 |
//! forwarded: | new object address ... |   0    |        0        | 1 |
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use static_assertions::const_assert;

use crate::promotion::TypeDescriptor;
use crate::util::ObjectReference;

/// The header holds a forwarding pointer.
pub const FORWARDED: usize = 0b001;
/// A copier claimed the object and is copying it.
pub const BEING_FORWARDED: usize = 0b010;
/// The object must not move in this cycle.
pub const PINNED: usize = 0b100;
const FLAG_MASK: usize = 0b111;

/// Copies are at least this aligned, so a forwarding pointer never overlaps the flags.
pub const MIN_COPY_ALIGNMENT: usize = FLAG_MASK + 1;

const_assert!(std::mem::align_of::<TypeDescriptor>() >= MIN_COPY_ALIGNMENT);

/// The decoded header of an object. Readers must branch on the tag before they
/// trust the payload.
#[derive(Copy, Clone, Debug)]
pub enum HeaderTag {
    Live {
        descriptor: &'static TypeDescriptor,
        pinned: bool,
        /// Claimed by a copier, see [`crate::promotion::ForwardingAttempt`].
        being_forwarded: bool,
    },
    Forwarded(ObjectReference),
}

impl HeaderTag {
    pub fn decode(word: usize) -> HeaderTag {
        let payload = word & !FLAG_MASK;
        if word & FORWARDED != 0 {
            return HeaderTag::Forwarded(ObjectReference::from_raw_address(unsafe {
                crate::util::Address::from_usize(payload)
            }));
        }
        if payload == 0 {
            gc_fatal!("Corrupted object header {:#x}: no type descriptor", word);
        }
        HeaderTag::Live {
            // Only `initialize_header` writes a descriptor address into a header.
            descriptor: unsafe { &*(payload as *const TypeDescriptor) },
            pinned: word & PINNED != 0,
            being_forwarded: word & BEING_FORWARDED != 0,
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, HeaderTag::Forwarded(_))
    }
}

fn header_word<'a>(object: ObjectReference) -> &'a AtomicUsize {
    // Every object starts with an aligned header word.
    unsafe { &*object.to_raw_address().to_ptr::<AtomicUsize>() }
}

/// Read the raw header word.
pub fn load(object: ObjectReference) -> usize {
    header_word(object).load(Ordering::Acquire)
}

pub fn header_tag(object: ObjectReference) -> HeaderTag {
    HeaderTag::decode(load(object))
}

/// Write a clean live header. Used for new objects and for fresh copies.
///
/// # Safety
/// `object` must point to writable memory of at least one word, and no other
/// thread may access the object yet.
pub unsafe fn initialize_header(object: ObjectReference, descriptor: &'static TypeDescriptor) {
    let word = descriptor as *const TypeDescriptor as usize;
    header_word(object).store(word, Ordering::Relaxed);
}

/// Atomically replace a header word. Returns the current word on failure.
pub(crate) fn compare_exchange(
    object: ObjectReference,
    old: usize,
    new: usize,
) -> Result<usize, usize> {
    header_word(object).compare_exchange(old, new, Ordering::SeqCst, Ordering::Acquire)
}

/// Publish the forwarding pointer. Everything written to the copy before this is
/// visible to a thread that reads the forwarding pointer.
pub(crate) fn install_forwarding_pointer(object: ObjectReference, new_object: ObjectReference) {
    debug_assert!(new_object.value() & FLAG_MASK == 0);
    header_word(object).store(new_object.value() | FORWARDED, Ordering::Release);
}

/// Set the pinned bit and clear the claim. Returns the previous header word.
pub(crate) fn pin_and_release(object: ObjectReference) -> usize {
    let update = |word: usize| Some((word | PINNED) & !BEING_FORWARDED);
    match header_word(object).fetch_update(Ordering::SeqCst, Ordering::Acquire, update) {
        Ok(previous) | Err(previous) => previous,
    }
}

/// Clear the claim without changing anything else.
pub(crate) fn release_claim(object: ObjectReference) {
    header_word(object).fetch_and(!BEING_FORWARDED, Ordering::SeqCst);
}

pub(crate) fn clear_pinned(object: ObjectReference) {
    header_word(object).fetch_and(!PINNED, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    static NODE: TypeDescriptor = TypeDescriptor::fixed("Node", 16);

    #[test]
    fn live_then_forwarded() {
        let mut words = [0usize; 2];
        let obj = ObjectReference::from_raw_address(Address::from_mut_ptr(words.as_mut_ptr()));
        unsafe { initialize_header(obj, &NODE) };
        match header_tag(obj) {
            HeaderTag::Live {
                descriptor,
                pinned,
                being_forwarded,
            } => {
                assert!(std::ptr::eq(descriptor, &NODE));
                assert!(!pinned);
                assert!(!being_forwarded);
            }
            HeaderTag::Forwarded(_) => panic!("fresh object is forwarded"),
        }

        pin_and_release(obj);
        assert!(matches!(header_tag(obj), HeaderTag::Live { pinned: true, .. }));
        clear_pinned(obj);
        assert!(matches!(header_tag(obj), HeaderTag::Live { pinned: false, .. }));

        let mut target = [0usize; 2];
        let new_obj =
            ObjectReference::from_raw_address(Address::from_mut_ptr(target.as_mut_ptr()));
        install_forwarding_pointer(obj, new_obj);
        match header_tag(obj) {
            HeaderTag::Forwarded(to) => assert_eq!(to, new_obj),
            HeaderTag::Live { .. } => panic!("not forwarded"),
        }
        assert!(header_tag(obj).is_forwarded());
    }
}
