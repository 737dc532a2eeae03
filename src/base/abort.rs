//! Request cancellation.
//!
//! An [`AbortSignal`] moves one way, from not-fired to fired. It can be shared
//! between any number of requests; firing it rejects each of them with
//! [`NetError::Aborted`].

use crate::base::neterror::NetError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Owner side of a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal handed to requests.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        self.token.cancel();
    }
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// Create a signal that fires on its own after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn timeout(delay: Duration) -> Self {
        let controller = AbortController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.abort();
        });
        signal
    }
}

/// Run `fut` unless `signal` fires first.
///
/// An already-fired signal wins without polling `fut`.
pub async fn with_abort<F, T>(signal: Option<&AbortSignal>, fut: F) -> Result<T, NetError>
where
    F: Future<Output = Result<T, NetError>>,
{
    let Some(signal) = signal else {
        return fut.await;
    };
    if signal.is_aborted() {
        return Err(NetError::Aborted);
    }
    tokio::select! {
        biased;
        _ = signal.aborted() => Err(NetError::Aborted),
        result = fut => result,
    }
}
