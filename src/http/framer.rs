//! HTTP message framing over a chunked byte stream.
//!
//! # Responsibilities
//! - Accumulate chunks from an [`Inbound`] until a message boundary is seen
//! - Apply the boundary policy of the direction (header terminator only, or
//!   header terminator then declared `Content-Length`)
//! - Abort without a partial result when the transport fails or the session
//!   stops running
//!
//! # Design Decisions
//! - One accumulate-until-boundary loop serves both policies
//! - Reads happen in fixed-size chunks; memory is bounded by `max_message_bytes`
//! - No internal deadline: stalled peers are bounded by the connection's idle timeout

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::config::{FramingConfig, RequestBoundary};
use crate::http::headers::{self, MessageKind, HEADER_TERMINATOR};
use crate::net::{Inbound, Peer, TransportError};

/// Default read size for each accumulation step.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Rule deciding when an accumulated message is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Complete as soon as the header terminator is present. The whole buffer,
    /// including any bytes that arrived after the terminator, is the message.
    HeaderTerminator,
    /// Complete once `header length + Content-Length` bytes are buffered.
    ///
    /// Without a usable `Content-Length` nothing more is waited for. A request
    /// or a bodiless response (1xx, 204, 304) ends at its header block. Any
    /// other response is close-delimited: everything buffered is the message,
    /// and later bytes on that direction are forwarded as they arrive.
    DeclaredLength,
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session stopped while framing")]
    Cancelled,
    #[error("{peer} message exceeds {limit} bytes")]
    MessageTooLarge { peer: Peer, limit: usize },
}

/// Accumulation buffer for the in-flight message of one direction.
///
/// Bytes received past the end of a completed message stay here and start
/// the next one.
#[derive(Debug, Default)]
pub struct PendingMessage {
    buf: BytesMut,
    /// Length of the header block once its terminator has been seen.
    header_len: Option<usize>,
    /// Declared body length; `None` is unknown.
    content_length: Option<usize>,
    /// Offset up to which the buffer is known not to contain a terminator.
    scanned: usize,
    /// Set once a close-delimited response has started; framing is over for
    /// the rest of the stream.
    close_delimited: bool,
}

impl PendingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Parsed header block, once the terminator has arrived.
    pub fn header_block(&self) -> Option<&[u8]> {
        self.header_len.map(|len| &self.buf[..len])
    }

    pub fn declared_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Whether the stream is inside a body that ends only at connection close.
    pub fn is_close_delimited(&self) -> bool {
        self.close_delimited
    }

    fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Split off the first `end` bytes as a finished message.
    fn complete(&mut self, end: usize) -> Bytes {
        let message = self.buf.split_to(end).freeze();
        self.header_len = None;
        self.content_length = None;
        self.scanned = 0;
        message
    }

    /// Drop everything accumulated so far.
    pub fn discard(&mut self) {
        self.buf.clear();
        self.header_len = None;
        self.content_length = None;
        self.scanned = 0;
    }
}

/// Boundary detector for one direction of a session.
#[derive(Debug, Clone)]
pub struct MessageFramer {
    kind: MessageKind,
    boundary: Boundary,
    chunk_size: usize,
    max_message_bytes: usize,
}

impl MessageFramer {
    pub fn new(kind: MessageKind, boundary: Boundary) -> Self {
        Self {
            kind,
            boundary,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_bytes: FramingConfig::default().max_message_bytes,
        }
    }

    /// Framer for the client direction.
    pub fn for_requests(config: &FramingConfig) -> Self {
        let boundary = match config.request_boundary {
            RequestBoundary::HeaderTerminator => Boundary::HeaderTerminator,
            RequestBoundary::DeclaredLength => Boundary::DeclaredLength,
        };
        Self::new(MessageKind::Request, boundary).with_limits(config.chunk_size, config.max_message_bytes)
    }

    /// Framer for the server direction.
    pub fn for_responses(config: &FramingConfig) -> Self {
        Self::new(MessageKind::Response, Boundary::DeclaredLength)
            .with_limits(config.chunk_size, config.max_message_bytes)
    }

    pub fn with_limits(mut self, chunk_size: usize, max_message_bytes: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.max_message_bytes = max_message_bytes;
        self
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Read until `pending` holds a complete message and return it.
    ///
    /// `running` is checked after every chunk; once it reports false the
    /// framer stops reading. On any error the pending buffer is discarded, so
    /// a partial message is never handed out.
    pub async fn next_message<S, F>(
        &self,
        inbound: &mut Inbound<S>,
        pending: &mut PendingMessage,
        running: F,
    ) -> Result<Bytes, FramingError>
    where
        S: AsyncRead,
        F: Fn() -> bool,
    {
        let result = self.accumulate(inbound, pending, running).await;
        if result.is_err() {
            pending.discard();
        }
        result
    }

    async fn accumulate<S, F>(
        &self,
        inbound: &mut Inbound<S>,
        pending: &mut PendingMessage,
        running: F,
    ) -> Result<Bytes, FramingError>
    where
        S: AsyncRead,
        F: Fn() -> bool,
    {
        loop {
            if let Some(end) = self.message_end(pending, inbound.peer())? {
                return Ok(pending.complete(end));
            }
            if pending.len() >= self.max_message_bytes {
                return Err(FramingError::MessageTooLarge {
                    peer: inbound.peer(),
                    limit: self.max_message_bytes,
                });
            }

            let chunk = inbound.receive(self.chunk_size).await?;
            if !running() {
                return Err(FramingError::Cancelled);
            }
            pending.extend(&chunk);
        }
    }

    /// Offset where the buffered message ends, if it is complete.
    fn message_end(&self, pending: &mut PendingMessage, peer: Peer) -> Result<Option<usize>, FramingError> {
        if pending.close_delimited {
            return Ok((!pending.is_empty()).then(|| pending.len()));
        }

        let header_len = match pending.header_len {
            Some(len) => len,
            None => {
                // The terminator may straddle the previous chunk boundary.
                let from = pending.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);
                match headers::find_header_end(&pending.buf, from) {
                    Some(len) => {
                        pending.header_len = Some(len);
                        if self.boundary == Boundary::DeclaredLength {
                            pending.content_length = headers::content_length(&pending.buf[..len], self.kind);
                        }
                        len
                    }
                    None => {
                        pending.scanned = pending.buf.len();
                        return Ok(None);
                    }
                }
            }
        };

        match self.boundary {
            Boundary::HeaderTerminator => Ok(Some(pending.len())),
            Boundary::DeclaredLength => match pending.content_length {
                None if self.kind == MessageKind::Request || headers::is_bodiless_response(&pending.buf[..header_len]) => {
                    Ok(Some(header_len))
                }
                None => {
                    pending.close_delimited = true;
                    Ok(Some(pending.len()))
                }
                Some(body_len) => {
                    let end = header_len.saturating_add(body_len);
                    if end > self.max_message_bytes {
                        return Err(FramingError::MessageTooLarge {
                            peer,
                            limit: self.max_message_bytes,
                        });
                    }
                    Ok((pending.len() >= end).then_some(end))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Connection;
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:40001".parse().unwrap()
    }

    fn scripted(peer: Peer, chunks: &[&[u8]]) -> Connection<tokio_test::io::Mock> {
        let mut builder = tokio_test::io::Builder::new();
        for chunk in chunks {
            builder.read(chunk);
        }
        Connection::new(peer, addr(), builder.build())
    }

    fn response_framer() -> MessageFramer {
        MessageFramer::new(MessageKind::Response, Boundary::DeclaredLength)
    }

    fn request_framer() -> MessageFramer {
        MessageFramer::new(MessageKind::Request, Boundary::HeaderTerminator)
    }

    #[tokio::test]
    async fn body_split_across_three_reads_completes_after_third() {
        let head: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
        let mut conn = scripted(Peer::Server, &[head, b"he", b"ll", b"o"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();

        let reads = Cell::new(0);
        let message = response_framer()
            .next_message(inbound, &mut pending, || {
                reads.set(reads.get() + 1);
                true
            })
            .await
            .unwrap();

        // One check per chunk read: the header chunk and the three body chunks.
        assert_eq!(reads.get(), 4);
        assert_eq!(&message[..], b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn bodiless_status_completes_at_headers() {
        let wire: &[u8] = b"HTTP/1.1 304 Not Modified\r\nETag: x\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        let mut conn = scripted(Peer::Server, &[wire]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = response_framer();

        let first = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&first[..], b"HTTP/1.1 304 Not Modified\r\nETag: x\r\n\r\n");
        assert!(!pending.is_close_delimited());

        let second = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&second[..], b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    }

    #[tokio::test]
    async fn missing_content_length_forwards_body_already_read() {
        let wire: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nhello body";
        let mut conn = scripted(Peer::Server, &[wire]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();

        let message = response_framer().next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&message[..], wire);
        assert!(pending.is_empty());
        assert!(pending.is_close_delimited());
    }

    #[tokio::test]
    async fn close_delimited_body_passes_through_as_it_arrives() {
        let mut conn = scripted(Peer::Server, &[b"HTTP/1.0 200 OK\r\n\r\nfirst ", b"second"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = response_framer();

        let head = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&head[..], b"HTTP/1.0 200 OK\r\n\r\nfirst ");

        // No terminator in the rest of the body, yet it is not held back.
        let rest = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&rest[..], b"second");
    }

    #[tokio::test]
    async fn declared_length_request_without_length_ends_at_headers() {
        let wire: &[u8] = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut conn = scripted(Peer::Client, &[wire]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = MessageFramer::new(MessageKind::Request, Boundary::DeclaredLength);

        let first = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&first[..], b"GET /a HTTP/1.1\r\n\r\n");
        let second = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&second[..], b"GET /b HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn bytes_after_declared_end_start_the_next_message() {
        let wire: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokHTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nyes";
        let mut conn = scripted(Peer::Server, &[wire]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = response_framer();

        let first = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&first[..], b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");

        // Already buffered: no further read is needed.
        let second = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&second[..], b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nyes");
    }

    #[tokio::test]
    async fn request_is_forwarded_with_trailing_bytes() {
        let wire: &[u8] = b"POST /a HTTP/1.1\r\nHost: x\r\n\r\nname=value";
        let mut conn = scripted(Peer::Client, &[wire]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();

        let message = request_framer().next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&message[..], wire);
    }

    #[tokio::test]
    async fn request_waits_for_terminator_across_chunks() {
        let mut conn = scripted(Peer::Client, &[b"GET / HTTP/1.1\r\nHost: x\r", b"\n\r", b"\n"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();

        let message = request_framer().next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&message[..], b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }

    #[tokio::test]
    async fn declared_length_requests_wait_for_body() {
        let mut conn = scripted(Peer::Client, &[b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab", b"cd"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = MessageFramer::new(MessageKind::Request, Boundary::DeclaredLength);

        let message = framer.next_message(inbound, &mut pending, || true).await.unwrap();
        assert_eq!(&message[..], b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd");
    }

    #[tokio::test]
    async fn transport_failure_yields_no_partial_message() {
        let mut conn = scripted(Peer::Server, &[b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();

        let err = response_framer().next_message(inbound, &mut pending, || true).await.unwrap_err();
        assert!(matches!(err, FramingError::Transport(TransportError::PeerClosed(Peer::Server))));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn stops_reading_once_session_is_not_running() {
        let mut conn = scripted(Peer::Client, &[b"GET / HTTP/1.1\r\n"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();

        let err = request_framer().next_message(inbound, &mut pending, || false).await.unwrap_err();
        assert!(matches!(err, FramingError::Cancelled));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn oversized_declaration_is_rejected() {
        let mut conn = scripted(Peer::Server, &[b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n"]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = response_framer().with_limits(16, 256);

        let err = framer.next_message(inbound, &mut pending, || true).await.unwrap_err();
        assert!(matches!(err, FramingError::MessageTooLarge { peer: Peer::Server, limit: 256 }));
    }

    #[tokio::test]
    async fn unterminated_headers_hit_the_buffer_limit() {
        let mut conn = scripted(Peer::Client, &[&[b'a'; 64]]);
        let (inbound, _) = conn.halves_mut();
        let mut pending = PendingMessage::new();
        let framer = request_framer().with_limits(64, 64);

        let err = framer.next_message(inbound, &mut pending, || true).await.unwrap_err();
        assert!(matches!(err, FramingError::MessageTooLarge { .. }));
    }

    fn frame_in_chunks(wire: &[u8], cuts: &[usize]) -> Vec<u8> {
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (wire.len() + 1)).collect();
        points.push(0);
        points.push(wire.len());
        points.sort_unstable();
        points.dedup();
        let chunks: Vec<&[u8]> = points.windows(2).map(|w| &wire[w[0]..w[1]]).collect();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut conn = scripted(Peer::Server, &chunks);
            let (inbound, _) = conn.halves_mut();
            let mut pending = PendingMessage::new();
            response_framer()
                .next_message(inbound, &mut pending, || true)
                .await
                .unwrap()
                .to_vec()
        })
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_change_the_message(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            cuts in proptest::collection::vec(any::<usize>(), 0..8),
        ) {
            let mut wire = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
            wire.extend_from_slice(&body);

            let whole = frame_in_chunks(&wire, &[]);
            let chunked = frame_in_chunks(&wire, &cuts);
            prop_assert_eq!(&whole, &wire);
            prop_assert_eq!(chunked, whole);
        }
    }
}
