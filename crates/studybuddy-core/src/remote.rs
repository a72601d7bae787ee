//! Timeout and cancellation for every network suspension point.
//!
//! A remote call that times out is a `SERVER_ERROR`, never a success. A call
//! that is cancelled through its [`CancelToken`] is `Cancelled`.

use crate::error::{Result, StudyError};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Observer side, cloned into every guarded call.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the source is dropped uncancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            let fired = *rx.borrow_and_update();
            if fired {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}

/// Run `fut` under a deadline and a cancellation token.
pub async fn guarded<T, F>(
    label: &str,
    timeout: Duration,
    cancel: &CancelToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(StudyError::Cancelled);
    }

    tokio::select! {
        result = fut => result,
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!("{} timed out after {:?}", label, timeout);
            Err(StudyError::server(format!("{} timed out after {}s", label, timeout.as_secs())))
        }
        _ = cancel.cancelled() => {
            tracing::info!("{} cancelled", label);
            Err(StudyError::Cancelled)
        }
    }
}
