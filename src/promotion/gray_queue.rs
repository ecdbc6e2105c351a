use crossbeam::deque::{Injector, Steal};

use crate::promotion::TypeDescriptor;
use crate::util::ObjectReference;

/// An object that was found reachable but whose fields were not scanned yet.
#[derive(Copy, Clone, Debug)]
pub struct GrayQueueEntry {
    pub object: ObjectReference,
    pub descriptor: &'static TypeDescriptor,
}

/// The work list of the tracer.
pub trait GrayQueue {
    fn enqueue(&mut self, object: ObjectReference, descriptor: &'static TypeDescriptor);
}

/// A gray queue owned by a single tracing thread.
#[derive(Default, Debug)]
pub struct LocalGrayQueue {
    entries: Vec<GrayQueueEntry>,
}

impl LocalGrayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&mut self) -> Option<GrayQueueEntry> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GrayQueueEntry] {
        &self.entries
    }
}

impl GrayQueue for LocalGrayQueue {
    fn enqueue(&mut self, object: ObjectReference, descriptor: &'static TypeDescriptor) {
        self.entries.push(GrayQueueEntry { object, descriptor });
    }
}

/// A gray queue shared by parallel copiers. Enqueue through a shared reference.
#[derive(Default)]
pub struct SharedGrayQueue {
    queue: Injector<GrayQueueEntry>,
}

impl SharedGrayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<GrayQueueEntry> {
        loop {
            match self.queue.steal() {
                Steal::Success(entry) => return Some(entry),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl GrayQueue for &SharedGrayQueue {
    fn enqueue(&mut self, object: ObjectReference, descriptor: &'static TypeDescriptor) {
        self.queue.push(GrayQueueEntry { object, descriptor });
    }
}

impl GrayQueue for SharedGrayQueue {
    fn enqueue(&mut self, object: ObjectReference, descriptor: &'static TypeDescriptor) {
        self.queue.push(GrayQueueEntry { object, descriptor });
    }
}
