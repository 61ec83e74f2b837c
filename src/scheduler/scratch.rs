use parking_lot::Mutex;
use serde_json::Value;
use std::ops::{Deref, DerefMut};

/// Reusable per-call buffers.
///
/// Each worker coroutine owns one and lends it to every task it runs; inline execution
/// borrows one from a [`ScratchPool`]. Buffers are cleared between uses but keep their
/// capacity.
#[derive(Debug, Default)]
pub struct Scratch {
    /// Decoded path segments during route matching
    pub segments: Vec<String>,
    /// Resolved handler arguments before they are handed to the handler
    pub args: Vec<Value>,
}

impl Scratch {
    pub fn reset(&mut self) {
        self.segments.clear();
        self.args.clear();
    }
}

/// Pool of [`Scratch`] buffers for callers that do not own one
#[derive(Debug)]
pub struct ScratchPool {
    free: Mutex<Vec<Scratch>>,
    max_idle: usize,
}

impl ScratchPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
        }
    }

    pub fn acquire(&self) -> PooledScratch<'_> {
        let scratch = self.free.lock().pop().unwrap_or_default();
        PooledScratch {
            pool: self,
            scratch,
        }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A [`Scratch`] on loan from a [`ScratchPool`]; returned on drop
pub struct PooledScratch<'a> {
    pool: &'a ScratchPool,
    scratch: Scratch,
}

impl Deref for PooledScratch<'_> {
    type Target = Scratch;

    fn deref(&self) -> &Scratch {
        &self.scratch
    }
}

impl DerefMut for PooledScratch<'_> {
    fn deref_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }
}

impl Drop for PooledScratch<'_> {
    fn drop(&mut self) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.reset();
        let mut free = self.pool.free.lock();
        if free.len() < self.pool.max_idle {
            free.push(scratch);
        }
    }
}
