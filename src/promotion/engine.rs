use std::sync::atomic::{AtomicUsize, Ordering};

use crate::promotion::header::{self, HeaderTag, MIN_COPY_ALIGNMENT, PINNED};
use crate::promotion::{CopySpace, ForwardingAttempt, GrayQueue, TypeDescriptor};
use crate::util::constants::{BYTES_IN_HEADER, MIN_OBJECT_SIZE};
use crate::util::conversions;
use crate::util::statistics::PromotionStatistics;
use crate::util::ObjectReference;

/// Copies live objects out of the space being collected.
///
/// The engine itself only keeps the set of objects pinned in this cycle and some
/// counters, so one engine can be shared by parallel copiers, each with its own
/// target space and gray queue.
#[derive(Default)]
pub struct PromotionEngine {
    pinned: spin::Mutex<Vec<ObjectReference>>,
    copied_objects: AtomicUsize,
    copied_bytes: AtomicUsize,
    pinned_on_failure: AtomicUsize,
}

impl PromotionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `object` into `space` and return the new address.
    ///
    /// The caller must either have stopped the world or hold the claim of a
    /// [`ForwardingAttempt`]. The copy gets a clean header, its interior pointer is
    /// rebased, it is pushed to `gray_queue` if it has references, and finally the
    /// forwarding pointer is installed in the old header.
    ///
    /// If `space` is full the object stays where it is. It is pinned, pushed to
    /// `gray_queue` (so its fields are still traced) and its own address is returned.
    /// A pinned object is returned as is.
    pub fn copy_object<S: CopySpace + ?Sized, Q: GrayQueue + ?Sized>(
        &self,
        object: ObjectReference,
        space: &mut S,
        gray_queue: &mut Q,
    ) -> ObjectReference {
        let descriptor = match header::header_tag(object) {
            HeaderTag::Forwarded(new_object) => {
                gc_fatal!("{} is already forwarded to {}", object, new_object)
            }
            HeaderTag::Live { pinned: true, .. } => return object,
            HeaderTag::Live { descriptor, .. } => descriptor,
        };

        let size = unsafe { descriptor.size_of(object) };
        if size < MIN_OBJECT_SIZE {
            gc_fatal!(
                "{} ({}) has size {}, smaller than its header",
                object,
                descriptor.name,
                size
            )
        }
        let align = space.alignment().max(MIN_COPY_ALIGNMENT);
        let bytes = conversions::object_size_align_up(size, align);
        let has_references = descriptor.has_references();

        let Some(to) = space.alloc(bytes, has_references) else {
            debug!(
                "No space to promote {} ({}, {} bytes), pinning it",
                object, descriptor.name, bytes
            );
            self.pinned_on_failure.fetch_add(1, Ordering::Relaxed);
            self.pin(object, descriptor, gray_queue);
            return object;
        };
        debug_assert!(
            to.is_aligned_to(align),
            "{} returned {} for alignment {}",
            std::any::type_name::<S>(),
            to,
            align
        );

        let from = object.to_raw_address();
        let new_object = ObjectReference::from_raw_address(to);
        unsafe {
            // The old header is the forwarding slot. Only the body is copied.
            std::ptr::copy_nonoverlapping(
                (from + BYTES_IN_HEADER).to_ptr::<u8>(),
                (to + BYTES_IN_HEADER).to_mut_ptr::<u8>(),
                size - BYTES_IN_HEADER,
            );
            #[cfg(feature = "extreme_assertions")]
            assert_eq!(
                std::slice::from_raw_parts((from + BYTES_IN_HEADER).to_ptr::<u8>(), size - BYTES_IN_HEADER),
                std::slice::from_raw_parts((to + BYTES_IN_HEADER).to_ptr::<u8>(), size - BYTES_IN_HEADER),
                "Body of {} differs after copying to {}",
                object,
                new_object
            );
            header::initialize_header(new_object, descriptor);
            if let Some(offset) = descriptor.interior_pointer {
                let target = (from + offset).load::<usize>();
                // The end of the object counts, for an empty trailing buffer.
                if target != 0 && target >= from.as_usize() && target <= from.as_usize() + size {
                    (to + offset).store::<usize>(to.as_usize() + (target - from.as_usize()));
                }
            }
        }
        trace!("Promoted {} ({}) to {}", object, descriptor.name, new_object);

        if has_references {
            gray_queue.enqueue(new_object, descriptor);
        }
        self.copied_objects.fetch_add(1, Ordering::Relaxed);
        self.copied_bytes.fetch_add(bytes, Ordering::Relaxed);
        header::install_forwarding_pointer(object, new_object);
        new_object
    }

    /// Return where `object` lives after this call, copying it if no other copier did.
    /// Safe to call from parallel copiers without stopping the world.
    pub fn trace_object<S: CopySpace + ?Sized, Q: GrayQueue + ?Sized>(
        &self,
        object: ObjectReference,
        space: &mut S,
        gray_queue: &mut Q,
    ) -> ObjectReference {
        match ForwardingAttempt::attempt(object) {
            ForwardingAttempt::Won(won) => won.forward_object(self, space, gray_queue),
            ForwardingAttempt::Lost(lost) => lost.spin_and_get_forwarded_object(),
        }
    }

    /// Pin a live object in place for this cycle, for example because a conservative
    /// root points to it. It is pushed to `gray_queue` if it has references.
    pub fn pin_object<Q: GrayQueue + ?Sized>(&self, object: ObjectReference, gray_queue: &mut Q) {
        match header::header_tag(object) {
            HeaderTag::Forwarded(new_object) => {
                gc_fatal!("Cannot pin {}: already forwarded to {}", object, new_object)
            }
            HeaderTag::Live { descriptor, .. } => self.pin(object, descriptor, gray_queue),
        }
    }

    fn pin<Q: GrayQueue + ?Sized>(
        &self,
        object: ObjectReference,
        descriptor: &'static TypeDescriptor,
        gray_queue: &mut Q,
    ) {
        let previous = header::pin_and_release(object);
        if previous & PINNED != 0 {
            return;
        }
        self.pinned.lock().push(object);
        if descriptor.has_references() {
            gray_queue.enqueue(object, descriptor);
        }
    }

    /// The objects pinned in this cycle.
    pub fn pinned_objects(&self) -> Vec<ObjectReference> {
        self.pinned.lock().clone()
    }

    /// Unpin every object pinned in this cycle. Call at the end of a cycle.
    /// Returns how many objects were unpinned.
    pub fn reset_pins(&self) -> usize {
        let pinned = std::mem::take(&mut *self.pinned.lock());
        for object in pinned.iter() {
            header::clear_pinned(*object);
        }
        pinned.len()
    }

    pub fn statistics(&self) -> PromotionStatistics {
        PromotionStatistics {
            copied_objects: self.copied_objects.load(Ordering::Relaxed),
            copied_bytes: self.copied_bytes.load(Ordering::Relaxed),
            pinned_on_failure: self.pinned_on_failure.load(Ordering::Relaxed),
            pinned_objects: self.pinned.lock().len(),
        }
    }
}

/// Where `object` lives now: the target of its forwarding pointer, or itself.
pub fn resolve(object: ObjectReference) -> ObjectReference {
    match header::header_tag(object) {
        HeaderTag::Forwarded(new_object) => new_object,
        HeaderTag::Live { .. } => object,
    }
}

pub fn is_forwarded(object: ObjectReference) -> bool {
    header::header_tag(object).is_forwarded()
}

pub fn is_pinned(object: ObjectReference) -> bool {
    matches!(
        header::header_tag(object),
        HeaderTag::Live { pinned: true, .. }
    )
}

/// Read the forwarding pointer of a forwarded object.
pub fn read_forwarding_pointer(object: ObjectReference) -> ObjectReference {
    match header::header_tag(object) {
        HeaderTag::Forwarded(new_object) => new_object,
        HeaderTag::Live { .. } => {
            gc_fatal!("read_forwarding_pointer called for {} that is not forwarded", object)
        }
    }
}
