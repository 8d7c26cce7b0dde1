//! Fixed-capacity append-only storage buffer.

use super::ArenaBuffer;
use kiln_common::{KilnError, KilnResult};

/// Monotonic arena over a mapped buffer. No growth, no removal: the capacity
/// given at construction is the only bound ever checked.
pub struct BufferArena<B: ArenaBuffer> {
    buffer: B,
    size: u64,
    label: String,
}

impl<B: ArenaBuffer> BufferArena<B> {
    pub fn new(buffer: B, label: impl Into<String>) -> Self {
        Self {
            buffer,
            size: 0,
            label: label.into(),
        }
    }

    /// Copy `bytes` to the end of the arena and return their byte offset.
    ///
    /// Fails without writing when the append would pass the capacity.
    pub fn append(&mut self, bytes: &[u8]) -> KilnResult<u64> {
        let requested = bytes.len() as u64;
        let end = self
            .size
            .checked_add(requested)
            .filter(|&end| end <= self.buffer.capacity())
            .ok_or_else(|| KilnError::capacity(&self.label, self.remaining(), requested))?;

        let offset = self.size;
        self.buffer.write(offset, bytes);
        self.size = end;
        Ok(offset)
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.capacity()
    }

    pub fn remaining(&self) -> u64 {
        self.buffer.capacity() - self.size
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
