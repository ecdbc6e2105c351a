use crate::util::constants::{BYTES_IN_HEADER, BYTES_IN_WORD};
use crate::util::{Address, ObjectReference};

/// How the size of an object is computed. All sizes include the header word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectLayout {
    /// Every instance has the same size.
    Fixed { bytes: usize },
    /// `base_bytes` plus `element_bytes` per element. The element count is the first
    /// word after the header, and the elements start at `base_bytes`.
    Vector {
        base_bytes: usize,
        element_bytes: usize,
    },
}

/// Which words of an object hold references to other objects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReferenceMap {
    /// No references. The object is never scanned.
    NoReferences,
    /// Byte offsets (from the object start) of the reference slots.
    Offsets(&'static [usize]),
    /// Every element of a vector is a reference.
    AllElements,
}

/// The per-type information the header of a live object points to.
///
/// Descriptors must outlive every object of their type, so they are `'static`. The
/// alignment leaves the low bits of a descriptor address free for header flags.
#[repr(align(8))]
#[derive(Debug)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub layout: ObjectLayout,
    pub references: ReferenceMap,
    /// Offset of a slot that may point into the object itself (a string's data
    /// pointer into its inline buffer, say). Rebased when the object moves.
    pub interior_pointer: Option<usize>,
}

impl TypeDescriptor {
    pub const fn fixed(name: &'static str, bytes: usize) -> Self {
        assert!(bytes >= BYTES_IN_HEADER, "An object is at least its header");
        TypeDescriptor {
            name,
            layout: ObjectLayout::Fixed { bytes },
            references: ReferenceMap::NoReferences,
            interior_pointer: None,
        }
    }

    pub const fn vector(name: &'static str, base_bytes: usize, element_bytes: usize) -> Self {
        assert!(
            base_bytes >= BYTES_IN_HEADER + BYTES_IN_WORD,
            "A vector is at least its header and its length word"
        );
        TypeDescriptor {
            name,
            layout: ObjectLayout::Vector {
                base_bytes,
                element_bytes,
            },
            references: ReferenceMap::NoReferences,
            interior_pointer: None,
        }
    }

    pub const fn with_references(self, references: ReferenceMap) -> Self {
        TypeDescriptor { references, ..self }
    }

    pub const fn with_interior_pointer(self, offset: usize) -> Self {
        TypeDescriptor {
            interior_pointer: Some(offset),
            ..self
        }
    }

    pub fn has_references(&self) -> bool {
        match self.references {
            ReferenceMap::NoReferences => false,
            ReferenceMap::Offsets(offsets) => !offsets.is_empty(),
            ReferenceMap::AllElements => true,
        }
    }

    /// The element count of a vector object.
    ///
    /// # Safety
    /// `object` must be a live object of this type.
    pub unsafe fn element_count(&self, object: ObjectReference) -> usize {
        match self.layout {
            ObjectLayout::Fixed { .. } => 0,
            ObjectLayout::Vector { .. } => {
                (object.to_raw_address() + BYTES_IN_HEADER).load::<usize>()
            }
        }
    }

    /// The size of `object` in bytes, header included, before alignment.
    ///
    /// # Safety
    /// `object` must be a live object of this type.
    pub unsafe fn size_of(&self, object: ObjectReference) -> usize {
        match self.layout {
            ObjectLayout::Fixed { bytes } => bytes,
            ObjectLayout::Vector {
                base_bytes,
                element_bytes,
            } => base_bytes + self.element_count(object) * element_bytes,
        }
    }

    /// Call `f` with the address of every reference slot of `object`.
    ///
    /// # Safety
    /// `object` must be a live object of this type.
    pub unsafe fn for_each_reference_slot<F: FnMut(Address)>(&self, object: ObjectReference, mut f: F) {
        let start = object.to_raw_address();
        match self.references {
            ReferenceMap::NoReferences => {}
            ReferenceMap::Offsets(offsets) => offsets.iter().for_each(|&o| f(start + o)),
            ReferenceMap::AllElements => {
                if let ObjectLayout::Vector {
                    base_bytes,
                    element_bytes,
                } = self.layout
                {
                    debug_assert_eq!(element_bytes, BYTES_IN_WORD);
                    for i in 0..self.element_count(object) {
                        f(start + base_bytes + i * element_bytes);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PAIR: TypeDescriptor = TypeDescriptor::fixed("Pair", 24)
        .with_references(ReferenceMap::Offsets(&[8, 16]));
    static REF_ARRAY: TypeDescriptor =
        TypeDescriptor::vector("Object[]", 16, 8).with_references(ReferenceMap::AllElements);
    static BYTES: TypeDescriptor = TypeDescriptor::vector("byte[]", 16, 1);

    #[test]
    fn fixed_size() {
        let mut words = [0usize; 3];
        let obj = ObjectReference::from_raw_address(Address::from_mut_ptr(words.as_mut_ptr()));
        unsafe {
            assert_eq!(PAIR.size_of(obj), 24);
            let mut slots = vec![];
            PAIR.for_each_reference_slot(obj, |s| slots.push(s - obj.to_raw_address()));
            assert_eq!(slots, vec![8, 16]);
        }
        assert!(PAIR.has_references());
        assert!(!BYTES.has_references());
    }

    #[test]
    fn vector_size() {
        let mut words = [0usize; 5];
        words[1] = 3;
        let obj = ObjectReference::from_raw_address(Address::from_mut_ptr(words.as_mut_ptr()));
        unsafe {
            assert_eq!(REF_ARRAY.size_of(obj), 16 + 3 * 8);
            assert_eq!(BYTES.size_of(obj), 16 + 3);
            let mut count = 0;
            REF_ARRAY.for_each_reference_slot(obj, |_| count += 1);
            assert_eq!(count, 3);
        }
    }

    #[test]
    #[should_panic(expected = "at least its header")]
    fn fixed_smaller_than_header_is_rejected() {
        TypeDescriptor::fixed("Tiny", std::hint::black_box(2));
    }

    #[test]
    #[should_panic(expected = "length word")]
    fn vector_without_length_word_is_rejected() {
        TypeDescriptor::vector("Broken[]", std::hint::black_box(4), 8);
    }

    #[test]
    fn descriptors_leave_room_for_flags() {
        assert!(std::mem::align_of::<TypeDescriptor>() >= 8);
        assert!(Address::from_ref(&PAIR).is_aligned_to(8));
    }
}
