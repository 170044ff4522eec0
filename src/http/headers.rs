//! Header block inspection needed for framing.
//!
//! The framer needs where the header block ends, what `Content-Length` it
//! declares and, for responses without one, whether the status allows a body.
//! Anything unusual about `Content-Length` collapses to "unknown".

/// Blank line separating the header block from the body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header slots handed to `httparse`. Blocks with more headers parse as unknown length.
const MAX_HEADERS: usize = 128;

/// Whether a header block starts a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// Position just past the header terminator, searching from `from`.
pub fn find_header_end(buf: &[u8], from: usize) -> Option<usize> {
    let start = from.min(buf.len());
    buf[start..]
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| start + pos + HEADER_TERMINATOR.len())
}

/// Declared body length of a complete header block.
///
/// Returns `None` when the header is absent, non-numeric, repeated with
/// conflicting values, or the block itself does not parse.
pub fn content_length(head: &[u8], kind: MessageKind) -> Option<usize> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let headers: &[httparse::Header<'_>] = match kind {
        MessageKind::Request => {
            let mut request = httparse::Request::new(&mut storage);
            match request.parse(head) {
                Ok(httparse::Status::Complete(_)) => request.headers,
                _ => return None,
            }
        }
        MessageKind::Response => {
            let mut response = httparse::Response::new(&mut storage);
            match response.parse(head) {
                Ok(httparse::Status::Complete(_)) => response.headers,
                _ => return None,
            }
        }
    };

    let mut declared = None;
    for header in headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case("content-length"))
    {
        let value = parse_length(header.value)?;
        match declared {
            Some(previous) if previous != value => return None,
            _ => declared = Some(value),
        }
    }
    declared
}

/// Whether a response header block has a status that never carries a body.
///
/// Unparsable blocks report false.
pub fn is_bodiless_response(head: &[u8]) -> bool {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut storage);
    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {
            matches!(response.code, Some(code) if (100..200).contains(&code) || code == 204 || code == 304)
        }
        _ => false,
    }
}

fn parse_length(raw: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_terminator_anywhere() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\n", 0), Some(18));
        assert_eq!(find_header_end(b"a\r\n\r\nbody", 0), Some(5));
        assert_eq!(find_header_end(b"a\r\n\r", 0), None);
        assert_eq!(find_header_end(b"", 0), None);
    }

    #[test]
    fn search_offset_still_finds_split_terminator() {
        let buf = b"HTTP/1.1 200 OK\r\n\r\n";
        // Resume a few bytes before the previous end of buffer.
        assert_eq!(find_header_end(buf, 15), Some(19));
        assert_eq!(find_header_end(buf, 100), None);
    }

    #[test]
    fn reads_content_length_case_insensitively() {
        let head = b"HTTP/1.1 200 OK\r\ncontent-LENGTH:  42 \r\n\r\n";
        assert_eq!(content_length(head, MessageKind::Response), Some(42));
    }

    #[test]
    fn missing_content_length_is_unknown() {
        let head = b"HTTP/1.1 204 No Content\r\nServer: x\r\n\r\n";
        assert_eq!(content_length(head, MessageKind::Response), None);
    }

    #[test]
    fn garbage_values_are_unknown() {
        for value in ["abc", "-1", "+5", "", "1 2"] {
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {value}\r\n\r\n");
            assert_eq!(content_length(head.as_bytes(), MessageKind::Response), None, "{value:?}");
        }
    }

    #[test]
    fn conflicting_duplicates_are_unknown() {
        let same = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\n";
        assert_eq!(content_length(same, MessageKind::Response), Some(3));

        let conflicting = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n";
        assert_eq!(content_length(conflicting, MessageKind::Response), None);
    }

    #[test]
    fn bodiless_statuses() {
        assert!(is_bodiless_response(b"HTTP/1.1 204 No Content\r\n\r\n"));
        assert!(is_bodiless_response(b"HTTP/1.1 304 Not Modified\r\n\r\n"));
        assert!(is_bodiless_response(b"HTTP/1.1 100 Continue\r\n\r\n"));
        assert!(!is_bodiless_response(b"HTTP/1.0 200 OK\r\n\r\n"));
        assert!(!is_bodiless_response(b"not http\r\n\r\n"));
    }

    #[test]
    fn request_heads_parse_as_requests() {
        let head = b"POST /login HTTP/1.1\r\nHost: a\r\nContent-Length: 7\r\n\r\n";
        assert_eq!(content_length(head, MessageKind::Request), Some(7));
        // The same block is not a valid response.
        assert_eq!(content_length(head, MessageKind::Response), None);
    }
}
