//! Message Dispatch
//!
//! Turns frames into handler invocations. Decode failures and unknown methods
//! are contained here and never reach the transport loop.
//!
//! `dispatch` never waits on a handler: it decodes, registers request ids,
//! applies `$/cancelRequest` and queues the call. A single worker task takes
//! calls in arrival order, runs sequential handlers itself and spawns
//! concurrent requests once a worker permit is free.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::context::RequestContext;
use super::router::{HandlerMode, HandlerResult, RawParams, Route, Router};
use crate::infra::protocol::{Envelope, RequestId, Response, ResponseError, methods};
use crate::infra::transport::{Frame, Outbound};

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler was scheduled.
    Routed,
    /// No handler for the method, or a response from the peer.
    Ignored,
    /// The body was not a usable envelope.
    DecodeFailed,
}

#[derive(Deserialize)]
struct CancelParams {
    id: RequestId,
}

// ============================================================================
// In-flight requests
// ============================================================================

/// Cancellation tokens of requests that have not answered yet.
///
/// Each registration carries a sequence number so a finished request never
/// removes a later request that reused its id.
#[derive(Default)]
struct InFlight {
    next_seq: AtomicU64,
    entries: Mutex<HashMap<RequestId, (u64, CancellationToken)>>,
}

struct Ticket {
    id: RequestId,
    seq: u64,
}

impl InFlight {
    async fn register(&self, id: RequestId, token: CancellationToken) -> Ticket {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if self
            .entries
            .lock()
            .await
            .insert(id.clone(), (seq, token))
            .is_some()
        {
            tracing::warn!("Request id {} reused while still in flight", id);
        }
        Ticket { id, seq }
    }

    async fn release(&self, ticket: &Ticket) {
        let mut entries = self.entries.lock().await;
        if entries
            .get(&ticket.id)
            .is_some_and(|(seq, _)| *seq == ticket.seq)
        {
            entries.remove(&ticket.id);
        }
    }

    async fn cancel(&self, id: &RequestId) -> bool {
        match self.entries.lock().await.get(id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn cancel_all(&self) {
        for (_, token) in self.entries.lock().await.values() {
            token.cancel();
        }
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Call {
    route: Route,
    params: RawParams,
    ctx: RequestContext,
    ticket: Option<Ticket>,
}

enum Job {
    Call(Call),
    /// Answered once every earlier job has been taken up.
    Barrier(oneshot::Sender<()>),
}

pub struct Dispatcher {
    router: Arc<Router>,
    outbound: Option<Arc<dyn Outbound>>,
    shutdown: CancellationToken,
    /// `None` runs every handler on the ordered worker.
    permits: Option<Arc<Semaphore>>,
    in_flight: Arc<InFlight>,
    tasks: TaskTracker,
    queue: OnceLock<mpsc::UnboundedSender<Job>>,
}

impl Dispatcher {
    pub fn new(router: impl Into<Arc<Router>>) -> Self {
        Self {
            router: router.into(),
            outbound: None,
            shutdown: CancellationToken::new(),
            permits: None,
            in_flight: Arc::default(),
            tasks: TaskTracker::new(),
            queue: OnceLock::new(),
        }
    }

    /// Channel used for responses and handler-originated notifications.
    pub fn with_outbound(mut self, outbound: Arc<dyn Outbound>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Run up to `limit` concurrent requests on their own tasks; 0 runs
    /// every handler one after another.
    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.permits = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Decode a frame and schedule its handler.
    ///
    /// Returns without waiting for any handler; use [`Dispatcher::settle`]
    /// or [`Dispatcher::drain`] to wait for scheduled work.
    pub async fn dispatch(&self, frame: Frame) -> DispatchOutcome {
        let envelope = match Envelope::decode(frame.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping undecodable message ({} bytes): {}", frame.len(), e);
                return DispatchOutcome::DecodeFailed;
            }
        };
        drop(frame);

        let Envelope {
            method, id, params, ..
        } = envelope;

        let Some(method) = method else {
            tracing::debug!("Ignoring response from peer for request {:?}", id);
            return DispatchOutcome::Ignored;
        };

        let cancel = method == methods::CANCEL_REQUEST;
        if cancel {
            self.cancel_from(params.as_deref()).await;
        }

        let Some(route) = self.router.route(&method) else {
            if cancel {
                return DispatchOutcome::Routed;
            }
            tracing::trace!("No handler for '{}', ignoring", method);
            return DispatchOutcome::Ignored;
        };

        tracing::debug!("Dispatching '{}' (id: {:?})", method, id);
        let ctx = RequestContext::new(method, id, self.shutdown.clone(), self.outbound.clone());
        let ticket = match ctx.id() {
            Some(id) => Some(
                self.in_flight
                    .register(id.clone(), ctx.cancellation().clone())
                    .await,
            ),
            None => None,
        };

        self.enqueue(Job::Call(Call {
            route: route.clone(),
            params,
            ctx,
            ticket,
        }));
        DispatchOutcome::Routed
    }

    fn enqueue(&self, job: Job) {
        let queue = self.queue.get_or_init(|| self.start_worker());
        if queue.send(job).is_err() {
            tracing::error!("Dispatch worker is gone, dropping message");
        }
    }

    fn start_worker(&self) -> mpsc::UnboundedSender<Job> {
        let (queue, jobs) = mpsc::unbounded_channel();
        let worker = Worker {
            outbound: self.outbound.clone(),
            shutdown: self.shutdown.clone(),
            permits: self.permits.clone(),
            gate: Arc::new(RwLock::new(())),
            in_flight: Arc::clone(&self.in_flight),
            tasks: self.tasks.clone(),
        };
        tokio::spawn(worker.run(jobs));
        queue
    }

    async fn cancel_from(&self, params: Option<&RawValue>) {
        let parsed = params
            .map(|raw| serde_json::from_str::<CancelParams>(raw.get()))
            .transpose();

        match parsed {
            Ok(Some(CancelParams { id })) => {
                if self.in_flight.cancel(&id).await {
                    tracing::debug!("Cancelling request {}", id);
                } else {
                    tracing::trace!("Cancel for unknown or finished request {}", id);
                }
            }
            Ok(None) => tracing::warn!("'{}' without params", methods::CANCEL_REQUEST),
            Err(e) => tracing::warn!("Invalid '{}' params: {}", methods::CANCEL_REQUEST, e),
        }
    }

    /// Cancel every request that has not answered yet, queued ones included.
    pub async fn cancel_all(&self) {
        self.in_flight.cancel_all().await;
    }

    /// Wait until every message dispatched so far has been taken up.
    ///
    /// Sequential handlers have finished by then; concurrent requests may
    /// still be running on their tasks.
    pub async fn settle(&self) {
        let Some(queue) = self.queue.get() else {
            return;
        };
        let (done, settled) = oneshot::channel();
        if queue.send(Job::Barrier(done)).is_ok() {
            let _ = settled.await;
        }
    }

    /// Wait for all dispatched work, spawned requests included.
    pub async fn drain(&self) {
        self.settle().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn in_flight_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Requests registered but not yet answered.
    pub async fn pending_requests(&self) -> usize {
        self.in_flight.len().await
    }
}

// ============================================================================
// Ordered worker
// ============================================================================

struct Worker {
    outbound: Option<Arc<dyn Outbound>>,
    shutdown: CancellationToken,
    permits: Option<Arc<Semaphore>>,
    /// Concurrent requests hold a read guard; sequential handlers take the
    /// write guard, so they never overlap with earlier requests.
    gate: Arc<RwLock<()>>,
    in_flight: Arc<InFlight>,
    tasks: TaskTracker,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            match job {
                Job::Barrier(done) => {
                    let _ = done.send(());
                }
                Job::Call(call) if self.shutdown.is_cancelled() => {
                    tracing::debug!("Exit requested, skipping '{}'", call.ctx.method());
                    if let Some(ticket) = &call.ticket {
                        self.in_flight.release(ticket).await;
                    }
                }
                Job::Call(call) => self.handle(call).await,
            }
        }
    }

    async fn handle(&self, call: Call) {
        let Call {
            route,
            params,
            ctx,
            ticket,
        } = call;
        let token = ctx.cancellation().clone();
        let method = ctx.method().to_string();
        let handler = route.call(params, ctx);

        let Some(ticket) = ticket else {
            let _gate = self.gate.write().await;
            if let Err(e) = handler.await {
                tracing::warn!("Notification handler '{}' failed: {}", method, e);
            }
            return;
        };

        match (&self.permits, route.mode()) {
            (Some(permits), HandlerMode::Concurrent) => {
                self.spawn_request(permits, ticket, token, handler).await
            }
            _ => {
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ResponseError::request_cancelled()),
                    result = async {
                        let _gate = self.gate.write().await;
                        handler.await
                    } => result,
                };
                finish(&self.in_flight, self.outbound.as_deref(), ticket, result).await;
            }
        }
    }

    async fn spawn_request(
        &self,
        permits: &Arc<Semaphore>,
        ticket: Ticket,
        token: CancellationToken,
        handler: BoxFuture<'static, HandlerResult>,
    ) {
        let slot = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            slot = async {
                let permit = Arc::clone(permits).acquire_owned().await.ok();
                let gate = Arc::clone(&self.gate).read_owned().await;
                (permit, gate)
            } => Some(slot),
        };

        let Some((permit, gate)) = slot else {
            tracing::debug!("Request {} cancelled before it started", ticket.id);
            let cancelled = Err(ResponseError::request_cancelled());
            return finish(&self.in_flight, self.outbound.as_deref(), ticket, cancelled).await;
        };

        let in_flight = Arc::clone(&self.in_flight);
        let outbound = self.outbound.clone();

        self.tasks.spawn(async move {
            let _permit = permit;
            let _gate = gate;

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("Request {} cancelled", ticket.id);
                    Err(ResponseError::request_cancelled())
                }
                result = handler => result,
            };

            finish(&in_flight, outbound.as_deref(), ticket, result).await;
        });
    }
}

async fn finish(
    in_flight: &InFlight,
    outbound: Option<&dyn Outbound>,
    ticket: Ticket,
    result: HandlerResult,
) {
    in_flight.release(&ticket).await;

    let response = match result {
        Ok(value) => Response::success(ticket.id, value),
        Err(error) => Response::error(ticket.id, error),
    };

    let Some(outbound) = outbound else {
        tracing::debug!("No outbound channel, dropping response to {:?}", response.id);
        return;
    };

    if let Err(e) = outbound.send(response.into()).await {
        tracing::warn!("Failed to send response: {}", e);
    }
}
