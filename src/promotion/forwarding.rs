use crate::promotion::header::{self, HeaderTag, BEING_FORWARDED};
use crate::promotion::{CopySpace, GrayQueue, PromotionEngine, TypeDescriptor};
use crate::util::ObjectReference;

/// This type, together with `WonForwardingAttempt` and `LostForwardingAttempt`, represents an
/// attempt to claim an object for copying when several copiers may reach it at once.
///
/// A copier calls `ForwardingAttempt::attempt(object)`, which tries to atomically set the
/// `BEING_FORWARDED` bit of a live, unpinned header.
///
/// -   If that succeeds (we "won" the race), the copier has the exclusive right to move the
///     object. It either copies it with `WonForwardingAttempt::forward_object`, or gives up
///     the claim with `WonForwardingAttempt::revert`.
///
/// -   If it fails (we "lost" the race), another copier is copying or has copied the object,
///     or the object is pinned. `LostForwardingAttempt::spin_and_get_forwarded_object` waits
///     for the other copier and returns where the object lives now.
#[must_use]
pub enum ForwardingAttempt {
    /// The header was live and unclaimed, and this thread claimed it.
    Won(WonForwardingAttempt),
    /// The header was claimed, forwarded or pinned.
    Lost(LostForwardingAttempt),
}

/// See [`ForwardingAttempt`].
#[must_use]
pub struct WonForwardingAttempt {
    object: ObjectReference,
    descriptor: &'static TypeDescriptor,
}

/// See [`ForwardingAttempt`].
#[must_use]
pub struct LostForwardingAttempt {
    object: ObjectReference,
    /// The header word seen by the failed attempt.
    old_state: usize,
}

impl ForwardingAttempt {
    pub fn attempt(object: ObjectReference) -> Self {
        loop {
            let old_state = header::load(object);
            match HeaderTag::decode(old_state) {
                HeaderTag::Live {
                    descriptor,
                    pinned: false,
                    being_forwarded: false,
                } => {
                    if header::compare_exchange(object, old_state, old_state | BEING_FORWARDED)
                        .is_ok()
                    {
                        return Self::Won(WonForwardingAttempt { object, descriptor });
                    }
                }
                _ => return Self::Lost(LostForwardingAttempt { object, old_state }),
            }
        }
    }
}

impl WonForwardingAttempt {
    pub fn object(&self) -> ObjectReference {
        self.object
    }

    pub fn descriptor(&self) -> &'static TypeDescriptor {
        self.descriptor
    }

    /// Copy the object and publish the forwarding pointer. If the space is full the
    /// object is pinned instead, the claim is released and the object itself is returned.
    pub fn forward_object<S: CopySpace + ?Sized, Q: GrayQueue + ?Sized>(
        self,
        engine: &PromotionEngine,
        space: &mut S,
        gray_queue: &mut Q,
    ) -> ObjectReference {
        engine.copy_object(self.object, space, gray_queue)
    }

    /// Give up the claim. The header is live and unclaimed again.
    pub fn revert(self) {
        header::release_claim(self.object);
    }
}

impl LostForwardingAttempt {
    /// Spin until the winner finished, then return the forwarded object. If the winner
    /// reverted or pinned the object, or it was pinned to begin with, return the object itself.
    pub fn spin_and_get_forwarded_object(self) -> ObjectReference {
        let mut state = self.old_state;
        loop {
            match HeaderTag::decode(state) {
                HeaderTag::Forwarded(new_object) => return new_object,
                HeaderTag::Live {
                    being_forwarded: true,
                    ..
                } => {
                    std::hint::spin_loop();
                    state = header::load(self.object);
                }
                HeaderTag::Live { .. } => return self.object,
            }
        }
    }
}
