//! Tri-state buffer usage counter
//!
//! One atomic word encodes whether a buffer exists and how many users
//! hold it:
//!
//! ```text
//!   -1  Unallocated   no buffer
//!    0  Idle          buffer allocated, no users
//!    n  InUse(n)      buffer allocated, n users
//! ```
//!
//! All transitions are CAS loops, so a free racing with an acquire sees
//! either the allocated value (and the acquire wins) or the unallocated
//! value (and the acquire fails). Nothing in between is observable.

use core::fmt;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::error::{MscError, Result};

const UNALLOCATED: i64 = -1;
const IDLE: i64 = 0;

/// Decoded usage counter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageState {
    /// No buffer
    Unallocated,
    /// Buffer allocated, nobody using it
    Idle,
    /// Buffer allocated with this many users
    InUse(u32),
}

impl UsageState {
    #[inline]
    fn from_raw(v: i64) -> Self {
        match v {
            v if v < 0 => UsageState::Unallocated,
            0 => UsageState::Idle,
            n => UsageState::InUse(n as u32),
        }
    }

    /// A buffer exists (idle or in use)
    #[inline]
    pub const fn is_allocated(&self) -> bool {
        !matches!(self, UsageState::Unallocated)
    }

    /// Number of users (zero when unallocated)
    #[inline]
    pub const fn users(&self) -> u32 {
        match self {
            UsageState::InUse(n) => *n,
            _ => 0,
        }
    }
}

impl fmt::Display for UsageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageState::Unallocated => write!(f, "unallocated"),
            UsageState::Idle => write!(f, "idle"),
            UsageState::InUse(n) => write!(f, "in use ({})", n),
        }
    }
}

/// Result of a conditional free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// Counter went Idle -> Unallocated; caller must release storage
    Freed,
    /// Buffer has users; nothing changed
    Busy,
    /// There was no buffer
    NotAllocated,
}

/// Lock-free usage counter
pub struct UsageCounter {
    raw: AtomicI64,
}

impl UsageCounter {
    /// New counter in the unallocated state
    pub const fn new() -> Self {
        Self {
            raw: AtomicI64::new(UNALLOCATED),
        }
    }

    /// Current state snapshot
    #[inline]
    pub fn state(&self) -> UsageState {
        UsageState::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Unallocated -> Idle, after storage has been set up.
    ///
    /// Release ordering publishes the allocation to anyone who later
    /// acquires a reference.
    pub fn mark_allocated(&self) -> Result<()> {
        self.raw
            .compare_exchange(UNALLOCATED, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| MscError::Busy)
    }

    /// Take a reference unless there is no buffer
    pub fn acquire(&self) -> Result<()> {
        let mut cur = self.raw.load(Ordering::Acquire);
        loop {
            if cur < 0 {
                return Err(MscError::NotReady);
            }
            match self.raw.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    /// RAII flavour of `acquire()`
    pub fn acquire_ref(&self) -> Result<UsageRef<'_>> {
        self.acquire()?;
        Ok(UsageRef { counter: self })
    }

    /// Drop a reference taken with `acquire()`
    pub fn release(&self) {
        let mut cur = self.raw.load(Ordering::Acquire);
        loop {
            if cur <= 0 {
                log::error!("usage counter release without reference (state {})", UsageState::from_raw(cur));
                return;
            }
            match self.raw.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Idle -> Unallocated, only if nobody holds a reference
    pub fn try_free(&self) -> FreeOutcome {
        match self
            .raw
            .compare_exchange(IDLE, UNALLOCATED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => FreeOutcome::Freed,
            Err(v) if v > 0 => FreeOutcome::Busy,
            Err(_) => FreeOutcome::NotAllocated,
        }
    }
}

impl Default for UsageCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UsageCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UsageCounter").field(&self.state()).finish()
    }
}

/// Reference held on a `UsageCounter`; released on drop
pub struct UsageRef<'a> {
    counter: &'a UsageCounter,
}

impl Drop for UsageRef<'_> {
    fn drop(&mut self) {
        self.counter.release();
    }
}
