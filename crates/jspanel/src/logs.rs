//! Live log streaming.
//!
//! Each viewer gets its own [`LogSubscription`] backed by one `logs --follow`
//! process. Cancelling or dropping the subscription kills that process.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::container::{ContainerRuntimeApi, LogStream};
use crate::error::{PanelError, PanelResult};

/// Hands out log subscriptions.
#[derive(Clone)]
pub struct LogBridge {
    runtime: Arc<dyn ContainerRuntimeApi>,
    tail_lines: u32,
}

impl LogBridge {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>, tail_lines: u32) -> Self {
        Self {
            runtime,
            tail_lines,
        }
    }

    /// Attach to the live output of `identity`.
    ///
    /// Refused with `NotFound` before anything is spawned if the container
    /// does not exist.
    pub async fn subscribe(&self, identity: &str) -> PanelResult<LogSubscription> {
        let record = self
            .runtime
            .inspect_container(identity)
            .await
            .map_err(|e| PanelError::runtime("inspect", identity, e))?;
        if record.is_none() {
            return Err(PanelError::NotFound(identity.to_string()));
        }

        let stream = self
            .runtime
            .stream_logs(identity, self.tail_lines)
            .await
            .map_err(|e| PanelError::runtime("logs", identity, e))?;

        info!(identity, tail = self.tail_lines, "Log subscription opened");
        Ok(LogSubscription {
            identity: identity.to_string(),
            stream,
            cancel: CancellationToken::new(),
        })
    }
}

/// One viewer's log stream.
pub struct LogSubscription {
    identity: String,
    stream: LogStream,
    cancel: CancellationToken,
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LogSubscription {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Next chunk of output.
    ///
    /// `None` once the subscription is cancelled or the container's output
    /// ends. Read errors also end the subscription.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.cancel.is_cancelled() {
            self.release();
            return None;
        }

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.stream.next() => Some(item),
        };

        match next {
            Some(Some(Ok(chunk))) => Some(chunk),
            Some(Some(Err(e))) => {
                debug!(identity = %self.identity, error = %e, "Log stream read failed");
                self.release();
                None
            }
            Some(None) => {
                debug!(identity = %self.identity, "Log stream ended");
                None
            }
            None => {
                self.release();
                None
            }
        }
    }

    /// Stop the subscription. Any pending `next_chunk` returns `None`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this subscription from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drop the underlying stream so its log process is killed now.
    fn release(&mut self) {
        self.stream = Box::pin(stream::empty());
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        debug!(identity = %self.identity, "Log subscription closed");
    }
}
