//! Driving the async SQLite driver from synchronous code.

use std::future::Future;
use std::panic;
use std::thread;

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

use crate::error::{Result, SqliteError};

/// The single-threaded runtime a provider runs its queries on.
///
/// Usable from plain threads and from inside any tokio runtime, and safe
/// to drop from async code.
#[derive(Debug)]
pub(crate) struct SyncRuntime {
    runtime: Option<Runtime>,
}

impl SyncRuntime {
    pub(crate) fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| SqliteError::Runtime(err.to_string()))?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Runs `future` to completion.
    ///
    /// On a multi-threaded runtime the current worker is handed off with
    /// `block_in_place`. A current-thread runtime cannot give up its only
    /// thread, so the future runs on a scoped helper thread instead.
    pub(crate) fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| SqliteError::Runtime("runtime is shut down".to_string()))?;

        let output = match Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Err(_) => runtime.block_on(future),
            Ok(RuntimeFlavor::CurrentThread) => thread::scope(|scope| {
                scope
                    .spawn(|| runtime.block_on(future))
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload))
            }),
            Ok(_) => tokio::task::block_in_place(|| runtime.block_on(future)),
        };
        Ok(output)
    }
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which tokio forbids on async threads.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
