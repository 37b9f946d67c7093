//! Tracking of scheduled simulation callbacks
//!
//! Every delayed callback an engine schedules runs as a tokio task registered
//! here under a generation (a run id or a ledger token), so rollback and reset
//! can abort the callbacks of earlier generations while newer ones keep
//! running. Once closed the set refuses new callbacks.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Slots {
    handles: Vec<(u64, JoinHandle<()>)>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct TimerSet {
    slots: Mutex<Slots>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a callback for `generation`. Returns false, without spawning,
    /// once the set is closed. Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, generation: u64, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.closed {
            return false;
        }
        slots.handles.retain(|(_, h)| !h.is_finished());
        slots.handles.push((generation, tokio::spawn(task)));
        true
    }

    /// Abort callbacks scheduled for generations below `generation`,
    /// returning how many were still pending
    pub fn cancel_before(&self, generation: u64) -> usize {
        let stale: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let (stale, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut slots.handles)
                .into_iter()
                .partition(|(g, _)| *g < generation);
            slots.handles = keep;
            stale.into_iter().map(|(_, h)| h).collect()
        };
        abort(stale)
    }

    /// Refuse further callbacks and abort every pending one
    pub fn close(&self) -> usize {
        let drained: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.closed = true;
            slots.handles.drain(..).map(|(_, h)| h).collect()
        };
        abort(drained)
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Number of callbacks that have not finished yet
    pub fn pending(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.handles.retain(|(_, h)| !h.is_finished());
        slots.handles.len()
    }
}

fn abort(handles: Vec<JoinHandle<()>>) -> usize {
    let mut pending = 0;
    for handle in handles {
        if !handle.is_finished() {
            pending += 1;
        }
        handle.abort();
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting(fired: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let fired = fired.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_prevents_callbacks() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for generation in 0..3 {
            assert!(timers.spawn(generation, counting(&fired)));
        }
        assert_eq!(timers.pending(), 3);

        assert_eq!(timers.close(), 3);
        assert!(timers.is_closed());
        assert!(!timers.spawn(9, counting(&fired)));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_keeps_newer_generations() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));

        timers.spawn(3, counting(&fired));
        timers.spawn(4, counting(&fired));
        timers.spawn(5, counting(&fired));

        assert_eq!(timers.cancel_before(4), 1);
        assert_eq!(timers.pending(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!timers.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_callbacks_are_reaped() {
        let timers = TimerSet::new();
        timers.spawn(0, async {});
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(timers.pending(), 0);
    }
}
