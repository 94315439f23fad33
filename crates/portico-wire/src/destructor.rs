//! Teardown coordinator shared by every component of one connection.
//!
//! Components register cleanup with [`Destructor::on_destroy`] without caring
//! whether destruction already happened: a registration made after
//! [`Destructor::destroy`] runs immediately.

use std::sync::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct DestructorState {
    destroyed: bool,
    callbacks: Vec<Callback>,
}

/// Idempotent, multi-subscriber teardown.
#[derive(Default)]
pub struct Destructor {
    state: Mutex<DestructorState>,
}

impl Destructor {
    /// Create a destructor with no registered callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown action.
    pub fn on_destroy<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.destroyed {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Run every registered action once, in registration order.
    ///
    /// Returns `false` if destruction had already happened.
    pub fn destroy(&self) -> bool {
        let callbacks = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.destroyed {
                return false;
            }
            state.destroyed = true;
            std::mem::take(&mut state.callbacks)
        };
        // Callbacks may re-enter (register more teardown, or call destroy).
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).destroyed
    }
}

impl std::fmt::Debug for Destructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Destructor")
            .field("destroyed", &state.destroyed)
            .field("pending_callbacks", &state.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runs_in_registration_order() {
        let destructor = Destructor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            destructor.on_destroy(move || order.lock().unwrap().push(i));
        }
        assert!(destructor.destroy());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let destructor = Destructor::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        destructor.on_destroy(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(destructor.destroy());
        assert!(!destructor.destroy());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(destructor.is_destroyed());
    }

    #[test]
    fn test_late_registration_runs_immediately() {
        let destructor = Destructor::new();
        destructor.destroy();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        destructor.on_destroy(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_destroy_from_callback() {
        let destructor = Arc::new(Destructor::new());
        let inner = Arc::clone(&destructor);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        destructor.on_destroy(move || {
            assert!(!inner.destroy());
            c.fetch_add(1, Ordering::SeqCst);
        });
        destructor.destroy();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
