//! Fid allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::fcall::NOFID;

/// First fid handed out by a fresh allocator
pub const FIRST_FID: u32 = 1;

/// Monotonic fid source owned by a session.
///
/// Fids are not reused until the 32-bit counter wraps. On wrap it skips `NOFID`
/// and 0 and starts again at 1.
#[derive(Debug)]
pub struct FidAllocator {
    next: AtomicU32,
}

impl FidAllocator {
    pub fn new() -> FidAllocator {
        Self::starting_at(FIRST_FID)
    }

    pub fn starting_at(first: u32) -> FidAllocator {
        FidAllocator {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_fid(&self) -> u32 {
        loop {
            let fid = self.next.fetch_add(1, Ordering::Relaxed);
            if fid != NOFID && fid != 0 {
                return fid;
            }
        }
    }
}

impl Default for FidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
