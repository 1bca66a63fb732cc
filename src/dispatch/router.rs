//! Method Routing Table
//!
//! Maps method names to handlers. Each handler owns the decoding of its own
//! parameters; the table only stores type-erased closures that take the raw
//! parameter text.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;

use super::context::RequestContext;
use crate::error::RouterError;
use crate::infra::protocol::ResponseError;

pub type RawParams = Option<Box<RawValue>>;
pub type HandlerResult = Result<Value, ResponseError>;

type BoxedHandler =
    Arc<dyn Fn(RawParams, RequestContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// How a handler is scheduled relative to other messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerMode {
    /// May run on a worker task alongside other concurrent requests.
    #[default]
    Concurrent,
    /// Runs in arrival order, after every earlier message finished.
    Sequential,
}

#[derive(Clone)]
pub struct Route {
    handler: BoxedHandler,
    mode: HandlerMode,
}

impl Route {
    pub fn mode(&self) -> HandlerMode {
        self.mode
    }

    pub(crate) fn call(
        &self,
        params: RawParams,
        ctx: RequestContext,
    ) -> BoxFuture<'static, HandlerResult> {
        (self.handler)(params, ctx)
    }
}

/// Registration table; frozen once handed to a dispatcher.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler working on the raw parameter blob.
    ///
    /// Method names are matched exactly and case-sensitively; a second
    /// registration for the same name is rejected.
    pub fn register<F, Fut>(
        &mut self,
        method: &str,
        mode: HandlerMode,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        F: Fn(RawParams, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if method.is_empty() {
            return Err(RouterError::EmptyMethod);
        }
        if self.routes.contains_key(method) {
            return Err(RouterError::DuplicateMethod(method.to_string()));
        }

        let boxed: BoxedHandler =
            Arc::new(move |params: RawParams, ctx: RequestContext| handler(params, ctx).boxed());
        self.routes.insert(
            method.to_string(),
            Route {
                handler: boxed,
                mode,
            },
        );
        tracing::debug!("Registered {:?} handler for '{}'", mode, method);
        Ok(self)
    }

    pub fn raw_request<F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        F: Fn(RawParams, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(method, HandlerMode::Concurrent, handler)
    }

    pub fn raw_notification<F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        F: Fn(RawParams, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(method, HandlerMode::Sequential, move |params, ctx| {
            handler(params, ctx).map(|()| Ok::<_, ResponseError>(Value::Null))
        })
    }

    /// Register a request handler with typed parameters and result.
    ///
    /// Parameters that fail to decode produce an `InvalidParams` error
    /// response without calling the handler.
    pub fn request<P, R, F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResponseError>> + Send + 'static,
    {
        self.request_with_mode(method, HandlerMode::Concurrent, handler)
    }

    /// Like [`Router::request`] for requests that read or write state
    /// shared with notifications.
    pub fn sequential_request<P, R, F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResponseError>> + Send + 'static,
    {
        self.request_with_mode(method, HandlerMode::Sequential, handler)
    }

    fn request_with_mode<P, R, F, Fut>(
        &mut self,
        method: &str,
        mode: HandlerMode,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResponseError>> + Send + 'static,
    {
        self.register(method, mode, move |params, ctx| {
            let call = decode_params::<P>(params.as_deref()).map(|p| handler(p, ctx));
            async move {
                let result = call?.await?;
                serde_json::to_value(result)
                    .map_err(|e| ResponseError::internal_error(&e.to_string()))
            }
        })
    }

    /// Register a notification handler with typed parameters.
    ///
    /// Notifications always run sequentially. Undecodable parameters are
    /// logged and the handler is skipped.
    pub fn notification<P, F, Fut>(
        &mut self,
        method: &str,
        handler: F,
    ) -> Result<&mut Self, RouterError>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(method, HandlerMode::Sequential, move |params, ctx| {
            let call = match decode_params::<P>(params.as_deref()) {
                Ok(p) => Some(handler(p, ctx)),
                Err(e) => {
                    tracing::warn!("Skipping '{}' notification: {}", ctx.method(), e.message);
                    None
                }
            };
            async move {
                if let Some(call) = call {
                    call.await;
                }
                Ok::<_, ResponseError>(Value::Null)
            }
        })
    }

    pub fn route(&self, method: &str) -> Option<&Route> {
        self.routes.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods().collect();
        methods.sort_unstable();
        f.debug_struct("Router").field("methods", &methods).finish()
    }
}

/// Decode handler parameters; absent params decode like JSON `null`.
fn decode_params<P: DeserializeOwned>(raw: Option<&RawValue>) -> Result<P, ResponseError> {
    let text = raw.map(RawValue::get).unwrap_or("null");
    serde_json::from_str(text).map_err(|e| ResponseError::invalid_params(&e.to_string()))
}
