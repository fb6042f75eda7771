// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Owned stack slabs with canary-guarded overflow detection.
//!
//! Each context gets a fixed-capacity region allocated once and never
//! resized or shared. Stacks grow downward, so the guard canaries sit
//! at the low end: a task that runs off the bottom scribbles over them
//! before it reaches unrelated memory. The scheduler verifies the
//! guard at every suspension point and turns corruption into a
//! reported fault instead of silent memory damage.

use crate::error::RtError;

/// Smallest stack the runtime will hand to a context. Requests below
/// this are a setup error, not a runtime hazard.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Default per-task stack. Sized for task bodies that format output
/// and call through boxed closures, with room to spare; callers with
/// deeper call graphs pass their own size at spawn.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

const GUARD_CANARY: u64 = 0xA5A5_5A5A_DEAD_57AC;
const GUARD_WORDS: usize = 8;

/// A fixed-capacity execution stack owned by exactly one context.
///
/// Stored as words so the guard canaries are naturally aligned.
#[derive(Debug)]
pub(crate) struct StackSlab {
    words: Box<[u64]>,
}

impl StackSlab {
    /// Allocate and guard a slab of at least `bytes` bytes.
    pub fn new(bytes: usize) -> Result<Self, RtError> {
        if bytes < MIN_STACK_SIZE {
            return Err(RtError::StackTooSmall {
                requested: bytes,
                min: MIN_STACK_SIZE,
            });
        }
        let mut words = vec![0u64; bytes.div_ceil(8)].into_boxed_slice();
        for word in words.iter_mut().take(GUARD_WORDS) {
            *word = GUARD_CANARY;
        }
        Ok(Self { words })
    }

    /// Highest usable address, aligned down to the 16 bytes the ABI
    /// requires of a stack pointer.
    pub fn top(&self) -> usize {
        let end = self.words.as_ptr() as usize + self.words.len() * 8;
        end & !0xF
    }

    /// True while the guard canaries are intact.
    pub fn guard_intact(&self) -> bool {
        self.words.iter().take(GUARD_WORDS).all(|w| *w == GUARD_CANARY)
    }

    pub fn size_bytes(&self) -> usize {
        self.words.len() * 8
    }

    /// Test hook: clobber a canary word.
    #[cfg(test)]
    pub(crate) fn corrupt_guard(&mut self) {
        self.words[0] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_request() {
        let err = StackSlab::new(4096).unwrap_err();
        assert!(matches!(
            err,
            RtError::StackTooSmall { requested: 4096, min: MIN_STACK_SIZE }
        ));
    }

    #[test]
    fn guard_starts_intact() {
        let slab = StackSlab::new(MIN_STACK_SIZE).unwrap();
        assert!(slab.guard_intact());
        assert!(slab.size_bytes() >= MIN_STACK_SIZE);
    }

    #[test]
    fn detects_corrupted_guard() {
        let mut slab = StackSlab::new(MIN_STACK_SIZE).unwrap();
        slab.words[GUARD_WORDS - 1] = 0;
        assert!(!slab.guard_intact());
    }

    #[test]
    fn top_is_16_byte_aligned() {
        let slab = StackSlab::new(MIN_STACK_SIZE).unwrap();
        assert_eq!(slab.top() % 16, 0);
        assert!(slab.top() > slab.words.as_ptr() as usize);
    }
}
