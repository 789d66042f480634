//! Shared helpers for the end-to-end scenario tests.

use std::sync::{Arc, Condvar, Mutex};

/// A one-shot gate a task can block on until the test releases it, standing
/// in for "this process/thread keeps running until the test says so" since
/// a bare `Task` closure has no other way to suspend itself mid-test.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
}
