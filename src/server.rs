//! Transport loop
//!
//! Reads frames from one input stream, hands them to the dispatcher and
//! decides, per error kind, whether to keep reading.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;

use crate::config::WireConfig;
use crate::dispatch::{Dispatcher, Router};
use crate::error::FrameError;
use crate::infra::retry::Backoff;
use crate::infra::transport::{Frame, FrameReader, FrameWriter};
use crate::infra::wire_log::{MessageLog, TracingLog};

/// Why the loop stopped without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The peer closed the input stream.
    StreamClosed,
    /// A handler or the host asked the server to stop.
    Shutdown,
    /// Frame boundaries could not be recovered.
    TooManyFramingErrors,
}

impl ExitReason {
    pub fn is_clean(self) -> bool {
        !matches!(self, Self::TooManyFramingErrors)
    }
}

pub struct Server {
    router: Arc<Router>,
    config: WireConfig,
    shutdown: CancellationToken,
    log: Option<Arc<dyn MessageLog>>,
}

impl Server {
    pub fn new(router: Router, config: WireConfig) -> Self {
        let log: Option<Arc<dyn MessageLog>> = if config.log_wire_traffic {
            Some(Arc::new(TracingLog))
        } else {
            None
        };
        Self {
            router: Arc::new(router),
            config,
            shutdown: CancellationToken::new(),
            log,
        }
    }

    /// Mirror raw traffic to `log`, regardless of `log_wire_traffic`.
    pub fn with_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Token that stops the loop before the next read when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Serve stdin/stdout until the stream closes or a handler exits.
    pub async fn stdio(&self) -> Result<ExitReason, FrameError> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection.
    ///
    /// Returns once the input ends, shutdown is requested or a fatal read
    /// error occurs; in-flight requests are drained first.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<ExitReason, FrameError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut frames =
            FrameReader::new(BufReader::new(reader)).with_limits(self.config.frame_limits());
        let mut writer = FrameWriter::new(writer);
        if let Some(log) = &self.log {
            frames = frames.with_log(Arc::clone(log));
            writer = writer.with_log(Arc::clone(log));
        }

        let dispatcher = Dispatcher::new(Arc::clone(&self.router))
            .with_outbound(Arc::new(writer))
            .with_max_concurrent(self.config.max_concurrent_requests)
            .with_shutdown(self.shutdown.clone());

        tracing::info!(
            "Serving {} methods (max concurrent requests: {})",
            self.router.len(),
            self.config.max_concurrent_requests
        );

        let result = self.serve(&mut frames, &dispatcher).await;

        if !matches!(result, Ok(ExitReason::StreamClosed)) {
            dispatcher.cancel_all().await;
        }
        self.drain(&dispatcher).await;

        // exit may be handled after the input already ended
        let result = match result {
            Ok(ExitReason::StreamClosed) if self.shutdown.is_cancelled() => {
                Ok(ExitReason::Shutdown)
            }
            other => other,
        };

        match &result {
            Ok(reason) => tracing::info!("Transport loop stopped: {:?}", reason),
            Err(e) => tracing::error!("Transport loop failed: {}", e),
        }
        result
    }

    /// Wait for dispatched work; whatever outlives the grace period is
    /// cancelled, then abandoned.
    async fn drain(&self, dispatcher: &Dispatcher) {
        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, dispatcher.drain()).await.is_ok() {
            return;
        }

        tracing::warn!("Handlers still running after {:?}, cancelling them", grace);
        dispatcher.cancel_all().await;
        if tokio::time::timeout(grace, dispatcher.drain()).await.is_err() {
            tracing::warn!(
                "Abandoning unfinished handlers ({} tasks)",
                dispatcher.in_flight_tasks()
            );
        }
    }

    async fn serve<R>(
        &self,
        frames: &mut FrameReader<R>,
        dispatcher: &Dispatcher,
    ) -> Result<ExitReason, FrameError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let mut backoff = Backoff::new(&self.config.io_retry);
        let mut framing_errors = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(ExitReason::Shutdown);
            }

            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(ExitReason::Shutdown),
                read = self.read_next(frames) => read,
            };

            match read {
                Ok(frame) => {
                    backoff.reset();
                    framing_errors = 0;
                    dispatcher.dispatch(frame).await;
                }
                Err(FrameError::StreamClosed) => return Ok(ExitReason::StreamClosed),
                Err(e) if e.is_framing() => {
                    framing_errors += 1;
                    tracing::warn!(
                        "Skipping bad frame ({}/{}): {}",
                        framing_errors,
                        self.config.max_consecutive_framing_errors,
                        e
                    );
                    if framing_errors >= self.config.max_consecutive_framing_errors {
                        tracing::error!("Too many consecutive framing errors, giving up");
                        return Ok(ExitReason::TooManyFramingErrors);
                    }
                }
                Err(e) => match backoff.next_delay(&e) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e),
                },
            }
        }
    }

    async fn read_next<R>(&self, frames: &mut FrameReader<R>) -> Result<Frame, FrameError>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        match self.config.read_timeout() {
            Some(limit) => tokio::time::timeout(limit, frames.read_frame())
                .await
                .unwrap_or_else(|_| Err(FrameError::TimedOut(limit.as_secs()))),
            None => frames.read_frame().await,
        }
    }
}
