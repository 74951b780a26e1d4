//! Observer lists and deferred change notification
//!
//! Models announce changes through an explicit observer list rather than any
//! ambient signal mechanism. Emission is synchronous on the mutating thread;
//! the subscriber list is cloned out of its lock before any callback runs,
//! so observers are always invoked with no model or series mutex held and
//! may re-enter the model freely.
//!
//! While a model is still being computed in the background its notifier is
//! usually switched to deferred mode: per-event change extents accumulate
//! silently and are flushed as a single `ChangedWithin` when the producer
//! updates completion.

use crate::model::ModelId;
use crate::time::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A change announcement from a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// The model has been edited, or more data has arrived from a
    /// background computation.
    Changed,
    /// As `Changed`, restricted to the given frame extent.
    ChangedWithin { start: Frame, end: Frame },
    /// Background processing has advanced without changing visible data.
    CompletionChanged,
    /// Background processing is complete; emitted exactly once.
    Ready,
    /// The model's owner is about to drop it.
    AboutToBeDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    /// Announce every edit as it happens.
    OnAdd,
    /// Accumulate edit extents; announce on the next completion update.
    Deferred,
}

pub type ObserverId = u64;

type Callback = Arc<dyn Fn(ModelId, &ModelEvent) + Send + Sync>;

struct NotifierInner {
    model_id: ModelId,
    observers: Mutex<Vec<(ObserverId, Callback)>>,
    next_observer_id: AtomicU64,
    mode: Mutex<NotifyMode>,
    deferred: Mutex<Option<(Frame, Frame)>>,
}

/// Cloneable handle to a model's observer list.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    pub fn new(model_id: ModelId, mode: NotifyMode) -> Self {
        Notifier {
            inner: Arc::new(NotifierInner {
                model_id,
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(1),
                mode: Mutex::new(mode),
                deferred: Mutex::new(None),
            }),
        }
    }

    pub fn model_id(&self) -> ModelId {
        self.inner.model_id
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(ModelId, &ModelEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.inner
            .observers
            .lock()
            .unwrap()
            .retain(|(oid, _)| *oid != id);
    }

    pub fn mode(&self) -> NotifyMode {
        *self.inner.mode.lock().unwrap()
    }

    pub fn switch_mode(&self, mode: NotifyMode) {
        *self.inner.mode.lock().unwrap() = mode;
    }

    /// Record an edit covering `[start, end)`: either announced at once or
    /// folded into the pending deferred extent, depending on mode.
    pub fn update(&self, start: Frame, end: Frame) {
        match self.mode() {
            NotifyMode::OnAdd => {
                self.emit(&ModelEvent::ChangedWithin { start, end });
            }
            NotifyMode::Deferred => {
                let mut deferred = self.inner.deferred.lock().unwrap();
                *deferred = match *deferred {
                    None => Some((start, end)),
                    Some((s, e)) => Some((s.min(start), e.max(end))),
                };
            }
        }
    }

    /// Flush any accumulated deferred extent as one `ChangedWithin`.
    pub fn make_deferred_notifications(&self) {
        let pending = self.inner.deferred.lock().unwrap().take();
        if let Some((start, end)) = pending {
            self.emit(&ModelEvent::ChangedWithin { start, end });
        }
    }

    pub fn emit(&self, event: &ModelEvent) {
        let callbacks: Vec<Callback> = {
            let observers = self.inner.observers.lock().unwrap();
            observers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for cb in callbacks {
            cb(self.inner.model_id, event);
        }
    }
}
