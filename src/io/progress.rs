use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Loading,
    Processing,
    Encoding,
    Complete,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SeparationProgress {
    pub phase: ProgressPhase,
    pub percent: f32,
    pub label: String,
    pub eta: Option<Duration>,
}

impl SeparationProgress {
    pub fn new(phase: ProgressPhase, percent: f32, label: impl Into<String>) -> Self {
        Self {
            phase,
            percent,
            label: label.into(),
            eta: None,
        }
    }

    pub fn with_eta(mut self, eta: Duration) -> Self {
        self.eta = Some(eta);
        self
    }
}

pub type ProgressObserver = Arc<dyn Fn(&SeparationProgress) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Multicast of progress events to registered observers.
///
/// Observers run synchronously on the emitting thread, in registration
/// order. The observer list is not locked while they run, so an observer
/// may subscribe or unsubscribe.
#[derive(Default)]
pub struct ProgressHub {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionId, ProgressObserver)>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        observer: impl Fn(&SeparationProgress) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(i, _)| *i != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn emit(&self, progress: &SeparationProgress) {
        let snapshot: Vec<ProgressObserver> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for observer in snapshot {
            observer(progress);
        }
    }
}
