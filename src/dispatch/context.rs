//! Per-message handler context

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::infra::protocol::{Notification, RequestId};
use crate::infra::transport::Outbound;

/// What a handler knows about the message it is serving.
#[derive(Clone)]
pub struct RequestContext {
    method: String,
    id: Option<RequestId>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    outbound: Option<Arc<dyn Outbound>>,
}

impl RequestContext {
    pub(crate) fn new(
        method: String,
        id: Option<RequestId>,
        shutdown: CancellationToken,
        outbound: Option<Arc<dyn Outbound>>,
    ) -> Self {
        Self {
            method,
            id,
            cancel: CancellationToken::new(),
            shutdown,
            outbound,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request id; `None` for notifications.
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn is_request(&self) -> bool {
        self.id.is_some()
    }

    /// Fires when the peer cancels this request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ask the transport loop to stop after the current message.
    pub fn request_exit(&self) {
        self.shutdown.cancel();
    }

    /// Send a notification to the peer.
    ///
    /// Without an outbound channel the message is dropped.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> io::Result<()> {
        match &self.outbound {
            Some(outbound) => outbound.send(Notification::new(method, params).into()).await,
            None => {
                tracing::debug!("No outbound channel, dropping '{}' notification", method);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_context() {
        let ctx = RequestContext::new("initialized".into(), None, CancellationToken::new(), None);
        assert_eq!(ctx.method(), "initialized");
        assert!(!ctx.is_request());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_request_exit_cancels_shutdown_token() {
        let shutdown = CancellationToken::new();
        let ctx = RequestContext::new(
            "exit".into(),
            Some(RequestId::Number(3)),
            shutdown.clone(),
            None,
        );
        ctx.request_exit();
        assert!(shutdown.is_cancelled());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_notify_without_outbound_is_dropped() {
        let ctx = RequestContext::new("m".into(), None, CancellationToken::new(), None);
        assert!(ctx.notify("window/logMessage", None).await.is_ok());
    }
}
