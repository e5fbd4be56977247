//! Detached background tasks
//!
//! Fire-and-forget work whose outcome is only logged. A supervising task
//! awaits the worker so failures and panics surface in the logs instead of
//! disappearing with the dropped handle.

use std::future::Future;

use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::error::Result;

/// Spawn `fut` on the current runtime without waiting for it.
///
/// Returns `false` (and runs nothing) when called outside a runtime.
pub fn spawn_detached<F>(name: impl Into<String>, fut: F) -> bool
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.into();
    let Ok(handle) = Handle::try_current() else {
        warn!(task = %name, "No async runtime, detached task not started");
        return false;
    };

    let worker = handle.spawn(fut);
    handle.spawn(async move {
        match worker.await {
            Ok(Ok(())) => debug!(task = %name, "Detached task finished"),
            Ok(Err(e)) => warn!(task = %name, error = %e, "Detached task failed"),
            Err(e) if e.is_panic() => error!(task = %name, "Detached task panicked"),
            Err(e) => warn!(task = %name, error = %e, "Detached task cancelled"),
        }
    });
    true
}
