//! Single-slot backpressure for live frame processing.
//!
//! Frame processing may take longer than the inter-frame interval. A
//! [`FrameGate`] admits one frame at a time; frames that arrive while a
//! previous one is still in flight are dropped by the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Slot {
    busy: AtomicBool,
    dropped: AtomicU64,
}

/// Clone-safe single in-flight slot.
#[derive(Debug, Clone, Default)]
pub struct FrameGate {
    slot: Arc<Slot>,
}

/// Holds the slot until dropped.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct FrameGuard {
    slot: Arc<Slot>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` if a frame is already in flight.
    pub fn try_enter(&self) -> Option<FrameGuard> {
        if self
            .slot
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(FrameGuard {
                slot: self.slot.clone(),
            })
        } else {
            self.slot.dropped.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.busy.load(Ordering::Acquire)
    }

    /// Frames refused since the gate was created.
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_slot() {
        let gate = FrameGate::new();
        let guard = gate.try_enter().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_enter().is_none());
        assert!(gate.clone().try_enter().is_none());
        assert_eq!(gate.dropped(), 2);

        drop(guard);
        assert!(!gate.is_busy());
        assert!(gate.try_enter().is_some());
    }

    #[tokio::test]
    async fn test_guard_moves_into_task() {
        let gate = FrameGate::new();
        let guard = gate.try_enter().unwrap();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            tokio::task::yield_now().await;
        });
        handle.await.unwrap();
        assert!(!gate.is_busy());
    }
}
