use std::sync::Mutex;

use metrics::counter;
use tokio_util::sync::CancellationToken;

struct State {
    detected: bool,
    lowest_height: u64,
}

/// At-most-once latch for the first pruned-node signal observed by any
/// concurrent worker in a sweep. The first caller to `signal(n)` wins and
/// triggers cancellation of the sweep's scope; every later caller observes
/// the latch already set and is a no-op.
pub struct PrunedNodeSignal {
    state: Mutex<State>,
    cancel: CancellationToken,
}

impl PrunedNodeSignal {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(State {
                detected: false,
                lowest_height: 0,
            }),
            cancel,
        }
    }

    /// Returns `true` if this call was the one that latched the signal.
    pub fn signal(&self, lowest_height: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.detected {
            return false;
        }
        state.detected = true;
        state.lowest_height = lowest_height;
        drop(state);
        self.cancel.cancel();
        counter!("extractor_pruned_node_signals_total").increment(1);
        true
    }

    pub fn observed(&self) -> Option<u64> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.detected.then_some(state.lowest_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_signal_wins() {
        let signal = PrunedNodeSignal::new(CancellationToken::new());
        assert!(signal.signal(100));
        assert!(!signal.signal(200));
        assert_eq!(signal.observed(), Some(100));
    }

    #[tokio::test]
    async fn concurrent_signals_only_trigger_once() {
        let signal = Arc::new(PrunedNodeSignal::new(CancellationToken::new()));
        let mut handles = Vec::new();
        for i in 0..16 {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.signal(100 + i) }));
        }
        let wins: usize = futures_join_all(handles).await.into_iter().filter(|w| *w).count();
        assert_eq!(wins, 1);
        assert!(signal.observed().is_some());
    }

    async fn futures_join_all(
        handles: Vec<tokio::task::JoinHandle<bool>>,
    ) -> Vec<bool> {
        let mut out = Vec::with_capacity(handles.len());
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }
}
