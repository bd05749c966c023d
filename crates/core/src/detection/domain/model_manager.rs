use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelLoadError {
    #[error("model file {0} is not cached and no download URL is configured")]
    NotFound(String),
    #[error("could not resolve model: {0}")]
    Resolve(String),
    #[error("detection backend failed to initialize: {0}")]
    Backend(String),
    #[error("model loader panicked")]
    Panicked,
}

/// Shared, read-only reference to a loaded model.
pub type ModelHandle<M> = Arc<M>;

type Loader<M> = Box<dyn Fn() -> Result<M, ModelLoadError> + Send + Sync>;

enum Slot<M> {
    Empty,
    Loading(u64),
    Ready(ModelHandle<M>),
}

struct SlotState<M> {
    slot: Slot<M>,
    attempts: u64,
    /// Outcome of the most recent failed attempt, so callers that waited on
    /// it receive the same error.
    failure: Option<(u64, ModelLoadError)>,
}

/// Loads a model at most once and shares it with every caller.
///
/// Concurrent `ensure_loaded` calls made while a load is in flight block on
/// that load instead of starting their own. After success the handle is
/// cached for the life of the manager; after failure the slot is emptied so
/// the next call retries.
///
/// The manager is owned by the composition root and injected where needed;
/// dropping the last reference releases the model.
pub struct ModelManager<M> {
    loader: Loader<M>,
    state: Mutex<SlotState<M>>,
    ready: Condvar,
    loads: AtomicUsize,
}

impl<M: Send + Sync + 'static> ModelManager<M> {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<M, ModelLoadError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            state: Mutex::new(SlotState {
                slot: Slot::Empty,
                attempts: 0,
                failure: None,
            }),
            ready: Condvar::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn ensure_loaded(&self) -> Result<ModelHandle<M>, ModelLoadError> {
        let mut state = self.lock();
        loop {
            match &state.slot {
                Slot::Ready(model) => return Ok(Arc::clone(model)),
                Slot::Loading(attempt) => {
                    let attempt = *attempt;
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                    if let Some((failed, err)) = &state.failure {
                        if *failed == attempt {
                            return Err(err.clone());
                        }
                    }
                }
                Slot::Empty => {
                    state.attempts += 1;
                    let attempt = state.attempts;
                    state.slot = Slot::Loading(attempt);
                    drop(state);
                    return self.load(attempt);
                }
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.lock().slot, Slot::Ready(_))
    }

    /// Number of times the underlying loader has been invoked.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn load(&self, attempt: u64) -> Result<ModelHandle<M>, ModelLoadError> {
        let guard = LoadGuard {
            manager: self,
            attempt,
            finished: false,
        };
        self.loads.fetch_add(1, Ordering::SeqCst);
        log::info!("Loading detection model (attempt {attempt})");
        let result = (self.loader)();
        guard.finish(result)
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes the outcome of one load attempt, including when the loader
/// unwinds, so waiters are never left blocked on a dead attempt.
struct LoadGuard<'a, M: Send + Sync + 'static> {
    manager: &'a ModelManager<M>,
    attempt: u64,
    finished: bool,
}

impl<M: Send + Sync + 'static> LoadGuard<'_, M> {
    fn finish(
        mut self,
        result: Result<M, ModelLoadError>,
    ) -> Result<ModelHandle<M>, ModelLoadError> {
        self.finished = true;
        let mut state = self.manager.lock();
        let outcome = match result {
            Ok(model) => {
                let handle = Arc::new(model);
                state.slot = Slot::Ready(Arc::clone(&handle));
                state.failure = None;
                log::info!("Detection model ready");
                Ok(handle)
            }
            Err(e) => {
                log::error!("Detection model failed to load: {e}");
                state.slot = Slot::Empty;
                state.failure = Some((self.attempt, e.clone()));
                Err(e)
            }
        };
        drop(state);
        self.manager.ready.notify_all();
        outcome
    }
}

impl<M: Send + Sync + 'static> Drop for LoadGuard<'_, M> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.manager.lock();
        state.slot = Slot::Empty;
        state.failure = Some((self.attempt, ModelLoadError::Panicked));
        drop(state);
        self.manager.ready.notify_all();
    }
}
