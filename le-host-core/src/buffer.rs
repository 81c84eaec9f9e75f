//! Statically allocated buffers
//!
//! The size of the buffer must be known at compile time. Both the advertising data and the
//! advertising report cache are bounded by the Bluetooth Core Specification so they never need
//! the heap.

use core::fmt::{Debug, Display, Formatter};
use core::ops::{Deref, DerefMut};

/// A linear buffer
///
/// Items are pushed to the end of the buffer. The buffer never grows past `SIZE`, attempting to
/// do so returns an error and leaves the buffer unchanged.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LinearBuffer<const SIZE: usize, T> {
    buffer: [T; SIZE],
    count: usize,
}

impl<T: Copy + Default, const SIZE: usize> LinearBuffer<SIZE, T> {
    pub fn new() -> Self {
        let buffer = [T::default(); SIZE];

        let count = 0;

        Self { buffer, count }
    }

    /// Try to push an item to the buffer
    pub fn try_push(&mut self, t: T) -> Result<(), LinearBufferError> {
        if self.count != SIZE {
            self.buffer[self.count] = t;
            self.count += 1;
            Ok(())
        } else {
            Err(LinearBufferError::BufferFull)
        }
    }

    /// Try to extend the buffer with every item in `items`
    ///
    /// Either all of `items` are added or none of them are.
    pub fn try_extend_from_slice(&mut self, items: &[T]) -> Result<(), LinearBufferError> {
        if items.len() <= self.remaining() {
            self.buffer[self.count..self.count + items.len()].copy_from_slice(items);
            self.count += items.len();
            Ok(())
        } else {
            Err(LinearBufferError::InsufficientCapacity)
        }
    }

    /// Shorten the buffer to `len` items
    pub fn truncate(&mut self, len: usize) {
        if len < self.count {
            self.buffer[len..self.count].fill(T::default());
            self.count = len;
        }
    }

    /// Remove every item
    pub fn clear(&mut self) {
        self.truncate(0)
    }

    /// Get the length
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Get the number of items that can still be pushed
    pub fn remaining(&self) -> usize {
        SIZE - self.count
    }

    /// Get the capacity
    pub const fn capacity() -> usize {
        SIZE
    }
}

impl<T: Copy + Default, const SIZE: usize> Default for LinearBuffer<SIZE, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const SIZE: usize> Deref for LinearBuffer<SIZE, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.buffer[..self.count]
    }
}

impl<T, const SIZE: usize> DerefMut for LinearBuffer<SIZE, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer[..self.count]
    }
}

impl<T: Debug, const SIZE: usize> Debug for LinearBuffer<SIZE, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str("LinearBuffer")?;
        Debug::fmt(self.deref(), f)
    }
}

impl<T: Copy + Default, const SIZE: usize> TryFrom<&[T]> for LinearBuffer<SIZE, T> {
    type Error = LinearBufferError;

    fn try_from(items: &[T]) -> Result<Self, Self::Error> {
        let mut buffer = Self::new();

        buffer.try_extend_from_slice(items)?;

        Ok(buffer)
    }
}

/// Error from a `LinearBuffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearBufferError {
    BufferFull,
    InsufficientCapacity,
}

impl Display for LinearBufferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            LinearBufferError::BufferFull => f.write_str("linear buffer full"),
            LinearBufferError::InsufficientCapacity => f.write_str("the capacity is too small"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinearBufferError {}
