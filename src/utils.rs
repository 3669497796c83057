use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::Result;

pub fn to_json<T>(input: &T) -> Result<String>
where
    T: ?Sized + Serialize,
{
    Ok(serde_json::to_string(input)?)
}

/// Locks `mutex`, recovering the guard if a holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Background task that is aborted when the handle is dropped.
#[derive(Debug)]
pub struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
