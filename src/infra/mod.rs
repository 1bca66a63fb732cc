//! Infrastructure layer for lspwire
//!
//! Byte-level framing, JSON-RPC envelope types and I/O helpers.

pub mod protocol;
pub mod retry;
pub mod transport;
pub mod wire_log;

pub use protocol::{
    Envelope, MessageKind, Notification, Outgoing, RequestId, Response, ResponseError,
};
pub use retry::{Backoff, RetryConfig};
pub use transport::{Frame, FrameLimits, FrameReader, FrameWriter, Outbound, encode_frame};
pub use wire_log::{MessageLog, NoLog, TracingLog};
