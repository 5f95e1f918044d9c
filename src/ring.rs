//! Bounded multi-producer multi-consumer ring buffer.
//!
//! One container type backs both the job queue and the fiber pool. Every
//! operation is a short critical section under a single lock, which keeps the
//! whole API linearisable and makes batch enqueue all-or-nothing for free.
//! FIFO order is only observable per producer when producers are serialised
//! externally.

use std::mem::MaybeUninit;

use parking_lot::Mutex;

/// Returned when an enqueue would exceed the fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

/// Fixed-capacity FIFO, thread-safe on all operations.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

struct Inner<T> {
    slots: Box<[MaybeUninit<T>]>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, MaybeUninit::uninit);
        RingBuffer {
            inner: Mutex::new(Inner {
                slots: slots.into_boxed_slice(),
                head: 0,
                len: 0,
            }),
            capacity,
        }
    }

    /// Appends `value`, or hands it back if the buffer is full.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.len == self.capacity {
            return Err(value);
        }
        let index = (inner.head + inner.len) % self.capacity;
        inner.slots[index] = MaybeUninit::new(value);
        inner.len += 1;
        Ok(())
    }

    /// Appends every element of `values`, or none of them.
    pub fn enqueue_batch(&self, values: &[T]) -> Result<(), Full>
    where
        T: Copy,
    {
        let mut inner = self.inner.lock();
        if self.capacity - inner.len < values.len() {
            return Err(Full);
        }
        for &value in values {
            let index = (inner.head + inner.len) % self.capacity;
            inner.slots[index] = MaybeUninit::new(value);
            inner.len += 1;
        }
        Ok(())
    }

    /// Removes and returns the oldest element.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.len == 0 {
            return None;
        }
        let value = unsafe { inner.slots[inner.head].assume_init_read() };
        inner.head = (inner.head + 1) % self.capacity;
        inner.len -= 1;
        Some(value)
    }

    /// Moves up to `max` elements into `dst`, returning how many were moved.
    pub fn dequeue_batch(&self, dst: &mut Vec<T>, max: usize) -> usize {
        let mut inner = self.inner.lock();
        let count = max.min(inner.len);
        for _ in 0..count {
            let value = unsafe { inner.slots[inner.head].assume_init_read() };
            inner.head = (inner.head + 1) % self.capacity;
            inner.len -= 1;
            dst.push(value);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let capacity = self.slots.len();
        for offset in 0..self.len {
            let index = (self.head + offset) % capacity;
            unsafe { self.slots[index].assume_init_drop() };
        }
    }
}
