//! The pending-abort register.
//!
//! Anything that detects an unrecoverable condition writes a reason here. The
//! engine checks the register after every opcode it dispatches and runs its
//! one recovery path when it finds a reason. Because the register is atomic, a
//! host can also set it from outside the engine, e.g. from a break-key
//! interrupt or a signal handler, through a cloned [`AbortHandle`].

use alloc::sync::Arc;
use portable_atomic::{AtomicU8, Ordering};

/// Why a line was aborted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    /// Cancelled by the host, usually a break key.
    CtrlC = 1,
    /// A token was neither a word nor a number.
    NotAWord = 2,
    /// A bad opcode, address or operand.
    Illegal = 3,
    /// The `abort` word ran.
    Word = 4,
}

impl AbortReason {
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Self::CtrlC),
            2 => Some(Self::NotAWord),
            3 => Some(Self::Illegal),
            4 => Some(Self::Word),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    pending: Arc<AtomicU8>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an abort. The first reason wins until the register is taken.
    pub fn request(&self, reason: AbortReason) {
        let _ = self
            .pending
            .compare_exchange(0, reason as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    /// Clears the register, returning the reason that was pending.
    pub fn take(&self) -> Option<AbortReason> {
        AbortReason::from_u8(self.pending.swap(0, Ordering::AcqRel))
    }

    pub fn clear(&self) {
        self.pending.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let handle = AbortHandle::new();
        let remote = handle.clone();
        assert!(!handle.is_pending());
        remote.request(AbortReason::CtrlC);
        handle.request(AbortReason::Illegal);
        assert!(handle.is_pending());
        assert_eq!(handle.take(), Some(AbortReason::CtrlC));
        assert_eq!(handle.take(), None);
        handle.request(AbortReason::Word);
        handle.clear();
        assert!(!remote.is_pending());
    }
}
