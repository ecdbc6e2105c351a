use crate::promotion::header::MIN_COPY_ALIGNMENT;
use crate::util::conversions;
use crate::util::Address;

/// Where promoted objects are copied to.
pub trait CopySpace {
    /// Allocate `bytes` (already rounded up to [`CopySpace::alignment`]). Returns
    /// `None` when the space is exhausted. `has_references` lets a space segregate
    /// objects that need scanning from those that do not.
    fn alloc(&mut self, bytes: usize, has_references: bool) -> Option<Address>;

    /// The alignment of every allocation.
    fn alignment(&self) -> usize {
        MIN_COPY_ALIGNMENT
    }
}

/// A bounded bump-pointer space over memory owned by the caller.
#[derive(Debug)]
pub struct BumpSpace {
    start: Address,
    cursor: Address,
    limit: Address,
}

impl BumpSpace {
    /// Create a space over `[start, start + bytes)`.
    ///
    /// # Safety
    /// The range must be writable and must not be used by anything else while the
    /// space or any object copied into it is in use.
    pub unsafe fn new(start: Address, bytes: usize) -> Self {
        let limit = start + bytes;
        let aligned = start.align_up(MIN_COPY_ALIGNMENT);
        let start = if aligned > limit { limit } else { aligned };
        BumpSpace {
            start,
            cursor: start,
            limit,
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn used(&self) -> usize {
        self.cursor - self.start
    }

    pub fn available(&self) -> usize {
        self.limit - self.cursor
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.is_within(self.start, self.limit - self.start)
    }

    /// Forget every allocation. Objects in the space must be dead.
    pub fn reset(&mut self) {
        self.cursor = self.start;
    }
}

impl CopySpace for BumpSpace {
    fn alloc(&mut self, bytes: usize, _has_references: bool) -> Option<Address> {
        let bytes = conversions::object_size_align_up(bytes, self.alignment());
        if bytes > self.available() {
            trace!(
                "BumpSpace at {} is full: {} requested, {} available",
                self.start,
                bytes,
                self.available()
            );
            return None;
        }
        let result = self.cursor;
        self.cursor += bytes;
        Some(result)
    }
}
