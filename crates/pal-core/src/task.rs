//! Fire-and-forget background work.

use std::future::Future;

use futures::FutureExt;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{error, warn};

use pal_contracts::error::PalResult;

/// Run `fut` in the background without awaiting it.
///
/// Failures and panics are logged under `name` and otherwise swallowed.
/// Returns `None` when called outside a Tokio runtime, in which case the
/// work is dropped with a warning.
pub fn spawn_detached<F>(name: &'static str, fut: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = PalResult<()>> + Send + 'static,
{
    let Ok(handle) = Handle::try_current() else {
        warn!(task = name, "no async runtime available, background task dropped");
        return None;
    };

    Some(handle.spawn(async move {
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "background task failed"),
            Err(_) => error!(task = name, "background task panicked"),
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use pal_contracts::error::PalError;

    use super::*;

    #[tokio::test]
    async fn detached_task_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = spawn_detached("set-flag", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        handle.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn errors_and_panics_do_not_escape() {
        let failing = spawn_detached("fail", async {
            Err(PalError::ServiceUnavailable { reason: "offline".to_string() })
        })
        .unwrap();
        assert!(failing.await.is_ok());

        let should_panic = true;
        let panicking = spawn_detached("panic", async move {
            if should_panic {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();
        assert!(panicking.await.is_ok());
    }

    #[test]
    fn outside_runtime_returns_none() {
        assert!(spawn_detached("nowhere", async { Ok(()) }).is_none());
    }
}
