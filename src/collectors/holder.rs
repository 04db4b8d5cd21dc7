use std::sync::{Arc, Mutex, MutexGuard};

/// Lock-guarded aggregate owned by one collector.
///
/// Ingestion mutates it through [`Accumulator::update`] and the scrape path
/// reads it through [`Accumulator::read`]. Both take the single lock for the
/// duration of the closure only, and because the closures are synchronous the
/// lock can never be held across an `.await`. Clones share the same data.
#[derive(Debug, Default)]
pub struct Accumulator<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Accumulator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Accumulator<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(data)),
        }
    }

    /// Read a consistent snapshot of the aggregate.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    /// Read-modify-write the aggregate.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    // A panic inside a closure must not take the scrape path down with it.
    fn lock(&self) -> MutexGuard<'_, T> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("accumulator lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
