//! Cancellation-aware futures.

use crate::error::{MirrorError, MirrorResult};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Races a future against a [`CancellationToken`].
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// `Err(MirrorError::Cancelled)` if the token fires first. A token that
    /// is already cancelled wins without polling the future.
    async fn or_cancel(self, token: &CancellationToken) -> MirrorResult<Self::Output>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> MirrorResult<Self::Output> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(MirrorError::Cancelled),
            res = self => Ok(res),
        }
    }
}

/// Short-circuit helper for the top of an operation.
pub fn ensure_active(token: &CancellationToken) -> MirrorResult<()> {
    if token.is_cancelled() {
        Err(MirrorError::Cancelled)
    } else {
        Ok(())
    }
}
