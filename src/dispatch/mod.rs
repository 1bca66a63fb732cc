//! Method routing and dispatch

pub mod context;
pub mod dispatcher;
pub mod router;

pub use context::RequestContext;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use router::{HandlerMode, HandlerResult, RawParams, Route, Router};
