//! Frame Transport Layer
//!
//! Handles message framing with Content-Length headers:
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0",...}
//! ```
//!
//! [`FrameReader`] reassembles frames from arbitrarily chunked input and owns
//! the input stream exclusively. [`FrameWriter`] is the outbound half.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::protocol::Outgoing;
use super::wire_log::{MessageLog, preview};
use crate::error::FrameError;

const CONTENT_LENGTH: &str = "content-length";

/// One complete message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Vec<u8>,
}

impl Frame {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

/// Resource guards applied while reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_frame_bytes: usize,
    pub max_header_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024 * 1024,
            max_header_bytes: 8 * 1024,
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

pub struct FrameReader<R> {
    reader: R,
    limits: FrameLimits,
    log: Option<Arc<dyn MessageLog>>,
    pending: PendingFrame,
}

/// Progress on a frame interrupted by a transient error.
#[derive(Debug, Default)]
struct PendingFrame {
    header: String,
    line: Vec<u8>,
    content_length: Option<Option<usize>>,
    body: Option<PendingBody>,
}

#[derive(Debug)]
struct PendingBody {
    length: usize,
    bytes: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            limits: FrameLimits::default(),
            log: None,
            pending: PendingFrame::default(),
        }
    }

    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Mirror every received body to `log`.
    pub fn with_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Read the next frame.
    ///
    /// Suspends until a whole frame is buffered, the stream ends
    /// ([`FrameError::StreamClosed`]) or the header block cannot be parsed.
    /// After a transient I/O error the bytes already consumed are kept, so
    /// calling again resumes the same frame.
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        let result = self.read_pending().await;
        if !matches!(&result, Err(e) if e.is_transient()) {
            self.pending = PendingFrame::default();
        }
        result
    }

    async fn read_pending(&mut self) -> Result<Frame, FrameError> {
        if self.pending.body.is_none() {
            let length = self.read_headers().await?;

            if length > self.limits.max_frame_bytes {
                return Err(FrameError::FrameTooLarge {
                    declared: length,
                    limit: self.limits.max_frame_bytes,
                });
            }
            self.pending.body = Some(PendingBody {
                length,
                bytes: Vec::with_capacity(length),
            });
        }

        let body = self.read_body().await?;

        if let Some(log) = &self.log {
            log.write(&preview("<-", &body));
        }

        Ok(Frame::new(body))
    }

    /// Read the header block and return the declared body length.
    ///
    /// The whole block is consumed even when the length is unusable, so the
    /// next read starts at the body.
    async fn read_headers(&mut self) -> Result<usize, FrameError> {
        loop {
            let pending = &mut self.pending;
            let remaining = self
                .limits
                .max_header_bytes
                .saturating_sub(pending.header.len() + pending.line.len());
            let bytes_read = (&mut self.reader)
                .take(remaining as u64)
                .read_until(b'\n', &mut pending.line)
                .await?;

            if pending.line.last() != Some(&b'\n') {
                if bytes_read == remaining {
                    return Err(FrameError::HeaderTooLarge {
                        limit: self.limits.max_header_bytes,
                    });
                }
                if !pending.header.is_empty() || !pending.line.is_empty() {
                    tracing::debug!(
                        "Stream ended inside a header block after {} bytes",
                        pending.header.len() + pending.line.len()
                    );
                }
                return Err(FrameError::StreamClosed);
            }

            let text = String::from_utf8_lossy(&pending.line).into_owned();
            pending.line.clear();
            pending.header.push_str(&text);

            // Empty line marks end of headers
            if text.trim().is_empty() {
                break;
            }

            if pending.content_length.is_none() {
                pending.content_length = parse_content_length(&text);
            }
            // Ignore other headers (Content-Type, etc.)
        }

        match self.pending.content_length {
            Some(Some(length)) => Ok(length),
            _ => Err(FrameError::malformed(std::mem::take(
                &mut self.pending.header,
            ))),
        }
    }

    async fn read_body(&mut self) -> Result<Vec<u8>, FrameError> {
        if let Some(body) = self.pending.body.as_mut() {
            let missing = body.length - body.bytes.len();
            (&mut self.reader)
                .take(missing as u64)
                .read_to_end(&mut body.bytes)
                .await?;

            if body.bytes.len() < body.length {
                return Err(FrameError::ShortRead {
                    expected: body.length,
                    actual: body.bytes.len(),
                });
            }
        }
        Ok(self
            .pending
            .body
            .take()
            .map(|body| body.bytes)
            .unwrap_or_default())
    }
}

/// Match a `Content-Length` header line.
///
/// Returns `None` when the line is some other header, `Some(None)` when it is
/// a length header whose value is not a plain decimal number.
fn parse_content_length(line: &str) -> Option<Option<usize>> {
    let (name, value) = line.split_once(':')?;
    if !name.eq_ignore_ascii_case(CONTENT_LENGTH) {
        return None;
    }

    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Some(None);
    }
    Some(value.parse().ok())
}

// ============================================================================
// Writer
// ============================================================================

/// Sink for messages the server sends to the peer.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, message: Outgoing) -> io::Result<()>;
}

/// Frame a body with the Content-Length header.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(body);
    framed
}

/// Writes framed messages; concurrent senders are serialized.
pub struct FrameWriter<W> {
    writer: Mutex<W>,
    log: Option<Arc<dyn MessageLog>>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            log: None,
        }
    }

    pub fn with_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub async fn write_frame(&self, body: &[u8]) -> io::Result<()> {
        if let Some(log) = &self.log {
            log.write(&preview("->", body));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&encode_frame(body)).await?;
        writer.flush().await
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> Outbound for FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: Outgoing) -> io::Result<()> {
        let json = serde_json::to_vec(&message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_frame(&json).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    use super::*;
    use crate::infra::protocol::{RequestId, Response};

    fn reader(input: &[u8]) -> FrameReader<&[u8]> {
        FrameReader::new(input)
    }

    #[tokio::test]
    async fn test_round_trip_framing() {
        let bodies: [&[u8]; 4] = [b"", b"x", br#"{"method":"ping"}"#, "héllo wörld".as_bytes()];
        for body in bodies {
            let framed = encode_frame(body);
            let frame = reader(&framed).read_frame().await.unwrap();
            assert_eq!(frame.as_bytes(), body);
        }
    }

    #[tokio::test]
    async fn test_example_ping_frame() {
        let input = b"Content-Length: 17\r\n\r\n{\"method\":\"ping\"}";
        let frame = reader(input).read_frame().await.unwrap();
        assert_eq!(frame.as_bytes(), br#"{"method":"ping"}"#);
        assert_eq!(frame.len(), 17);
    }

    #[tokio::test]
    async fn test_header_name_is_case_insensitive() {
        for name in ["content-length", "Content-Length", "CONTENT-LENGTH", "cOnTeNt-LeNgTh"] {
            let input = format!("{}: 5\r\n\r\nhello", name);
            let frame = reader(input.as_bytes()).read_frame().await.unwrap();
            assert_eq!(frame.as_bytes(), b"hello");
        }
    }

    #[tokio::test]
    async fn test_extra_headers_and_whitespace() {
        let input = b"Content-Type: application/vscode-jsonrpc; charset=utf-8\r\n\
            Content-Length:    4   \r\n\
            X-Other: 99\r\n\r\ntest";
        let frame = reader(input).read_frame().await.unwrap();
        assert_eq!(frame.as_bytes(), b"test");
    }

    #[tokio::test]
    async fn test_bare_newlines_are_accepted() {
        let input = b"Content-Length: 2\n\nok";
        let frame = reader(input).read_frame().await.unwrap();
        assert_eq!(frame.as_bytes(), b"ok");
    }

    #[tokio::test]
    async fn test_first_length_header_wins() {
        let input = b"Content-Length: 2\r\ncontent-length: 5\r\n\r\nokhello";
        let mut r = reader(input);
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"ok");
    }

    #[tokio::test]
    async fn test_zero_length_frame() {
        let input = b"Content-Length: 0\r\n\r\nContent-Length: 1\r\n\r\nx";
        let mut r = reader(input);
        assert!(r.read_frame().await.unwrap().is_empty());
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"x");
    }

    #[tokio::test]
    async fn test_consecutive_frames() {
        let mut input = encode_frame(br#"{"method":"a"}"#);
        input.extend(encode_frame(br#"{"method":"b"}"#));
        let mut r = reader(&input);
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), br#"{"method":"a"}"#);
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), br#"{"method":"b"}"#);
        assert!(matches!(r.read_frame().await, Err(FrameError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_chunked_input_is_reassembled() {
        let mock = Builder::new()
            .read(b"Cont")
            .read(b"ent-Length")
            .read(b": 1")
            .read(b"7\r")
            .read(b"\n\r\n{\"meth")
            .read(b"od\":\"pi")
            .read(b"ng\"}")
            .build();
        let mut r = FrameReader::new(BufReader::new(mock));
        let frame = r.read_frame().await.unwrap();
        assert_eq!(frame.as_bytes(), br#"{"method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_short_body_is_short_read() {
        let input = b"Content-Length: 18\r\n\r\n{\"method\":\"ping\"}";
        let result = reader(input).read_frame().await;
        assert!(matches!(
            result,
            Err(FrameError::ShortRead {
                expected: 18,
                actual: 17
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_length_is_malformed() {
        let result = reader(b"\r\n\r\n").read_frame().await;
        match result {
            Err(FrameError::MalformedFrame { header }) => assert_eq!(header, "\r\n"),
            other => panic!("expected MalformedFrame, got {:?}", other),
        }

        let result = reader(b"Content-Type: application/json\r\n\r\ntest")
            .read_frame()
            .await;
        match result {
            Err(FrameError::MalformedFrame { header }) => {
                assert_eq!(header, "Content-Type: application/json\r\n\r\n")
            }
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_length_values_are_malformed() {
        for value in ["", "abc", "-1", "12abc", "1.5", "99999999999999999999999999"] {
            let input = format!("Content-Length: {}\r\n\r\n", value);
            let result = reader(input.as_bytes()).read_frame().await;
            assert!(
                matches!(result, Err(FrameError::MalformedFrame { .. })),
                "value {:?} gave {:?}",
                value,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_length_must_start_the_line() {
        let input: &[u8] =
            b"X-Content-Length: 5\r\nFoo: Content-Length: 5\r\n Content-Length: 5\r\n\r\nhello";
        let result = reader(input).read_frame().await;
        assert!(matches!(result, Err(FrameError::MalformedFrame { .. })));
    }

    #[tokio::test]
    async fn test_malformed_header_block_is_fully_consumed() {
        let mut input = b"Content-Length: nope\r\nX-Trailer: 1\r\n\r\n".to_vec();
        input.extend(encode_frame(b"next"));
        let mut r = reader(&input);
        assert!(matches!(
            r.read_frame().await,
            Err(FrameError::MalformedFrame { .. })
        ));
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"next");
    }

    #[tokio::test]
    async fn test_eof_is_stream_closed() {
        assert!(matches!(
            reader(b"").read_frame().await,
            Err(FrameError::StreamClosed)
        ));
        assert!(matches!(
            reader(b"Content-Length: 10").read_frame().await,
            Err(FrameError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_io_error_is_distinct() {
        let mock = Builder::new()
            .read(b"Content-Length: 10\r\n\r\nabc")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"))
            .build();
        let mut r = FrameReader::new(BufReader::new(mock));
        match r.read_frame().await {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_error_mid_body_resumes() {
        let mock = Builder::new()
            .read(b"Content-Length: 17\r\n\r\n{\"meth")
            .read_error(io::Error::from(io::ErrorKind::TimedOut))
            .read(b"od\":\"ping\"}")
            .build();
        let mut r = FrameReader::new(BufReader::new(mock));

        let err = r.read_frame().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), br#"{"method":"ping"}"#);
        assert!(matches!(r.read_frame().await, Err(FrameError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_transient_error_mid_header_resumes() {
        let mock = Builder::new()
            .read(b"X-Trace: 1\r\nContent-Le")
            .read_error(io::Error::from(io::ErrorKind::Interrupted))
            .read(b"ngth: 2\r\n\r\nok")
            .read_error(io::Error::from(io::ErrorKind::TimedOut))
            .read(b"Content-Length: 1\r\n\r\nx")
            .build();
        let mut r = FrameReader::new(BufReader::new(mock));

        assert!(r.read_frame().await.unwrap_err().is_transient());
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"ok");
        assert!(r.read_frame().await.unwrap_err().is_transient());
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"x");
    }

    #[tokio::test]
    async fn test_fatal_error_discards_partial_frame() {
        let mock = Builder::new()
            .read(b"Content-Length: 5\r\n\r\nab")
            .read_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .read(b"Content-Length: 2\r\n\r\nok")
            .build();
        let mut r = FrameReader::new(BufReader::new(mock));

        assert!(matches!(r.read_frame().await, Err(FrameError::Io(_))));
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"ok");
    }

    #[tokio::test]
    async fn test_frame_limit() {
        let limits = FrameLimits {
            max_frame_bytes: 4,
            ..Default::default()
        };
        let result = reader(b"Content-Length: 5\r\n\r\nhello")
            .with_limits(limits)
            .read_frame()
            .await;
        assert!(matches!(
            result,
            Err(FrameError::FrameTooLarge {
                declared: 5,
                limit: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_header_limit() {
        let limits = FrameLimits {
            max_header_bytes: 16,
            ..Default::default()
        };
        let input = b"X-Padding: aaaaaaaaaaaaaaaaaaaaaaaa\r\nContent-Length: 1\r\n\r\nx";
        let result = reader(input).with_limits(limits).read_frame().await;
        assert!(matches!(
            result,
            Err(FrameError::HeaderTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn test_received_bodies_are_logged() {
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let log: Arc<dyn MessageLog> =
            Arc::new(move |line: &str| captured.lock().unwrap().push(line.to_string()));

        let input = encode_frame(br#"{"method":"ping"}"#);
        reader(&input).with_log(log).read_frame().await.unwrap();

        assert_eq!(*lines.lock().unwrap(), vec![r#"<- {"method":"ping"}"#]);
    }

    #[tokio::test]
    async fn test_writer_frames_messages() {
        let writer = FrameWriter::new(Vec::new());
        let response = Response::success(RequestId::Number(1), serde_json::json!({"ok": true}));
        writer.send(response.into()).await.unwrap();

        let written = writer.into_inner();
        let body = br#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        assert_eq!(written, encode_frame(body));
    }

    #[tokio::test]
    async fn test_writer_output_reads_back() {
        let writer = FrameWriter::new(Vec::new());
        writer.write_frame(b"one").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        let written = writer.into_inner();

        let mut r = reader(&written);
        assert_eq!(r.read_frame().await.unwrap().as_bytes(), b"one");
        assert!(r.read_frame().await.unwrap().is_empty());
    }

    #[test]
    fn test_message_framing() {
        let json = r#"{"jsonrpc":"2.0","id":1,"method":"test"}"#;
        let framed = encode_frame(json.as_bytes());
        assert!(framed.starts_with(b"Content-Length: 40\r\n\r\n"));
        assert!(framed.ends_with(json.as_bytes()));
    }
}
