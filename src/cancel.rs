//! Cooperative cancellation
//!
//! A perform carries a [`Cancellation`] handle. Backoff sleeps and in-flight
//! HTTP requests race against it and surface [`PerformError::Cancelled`]
//! promptly when the caller fires the paired [`CancellationSource`].

use tokio::sync::watch;

/// Caller-side handle that fires cancellation.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    /// Create a source and the token observed by the runtime.
    pub fn new() -> (Self, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Cancellation { rx: Some(rx) })
    }

    /// Signal cancellation to every clone of the token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Runtime-side cancellation token. The default token never fires.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once cancellation fires; pends forever on a never-token.
    pub async fn cancelled(&self) {
        match &self.rx {
            Some(rx) => {
                let mut rx = rx.clone();
                // Already-fired or sender-dropped both resolve immediately.
                if *rx.borrow() {
                    return;
                }
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        return;
                    }
                }
                std::future::pending::<()>().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
