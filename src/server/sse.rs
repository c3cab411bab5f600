//! Server-Sent Events framing
//!
//! Payload bytes are copied into `data:` lines verbatim. SSE treats `\r`,
//! `\n` and `\r\n` as line terminators, so a payload containing any of them
//! is split into several `data:` lines; the browser joins them back with `\n`.

use bytes::{BufMut, Bytes, BytesMut};

/// First chunk written to every stream; clients ignore comment lines
pub const CONNECTED: &[u8] = b": connected\n\n";

/// Content type of the event stream
pub const CONTENT_TYPE: &str = "text/event-stream";

const DATA_PREFIX: &[u8] = b"data: ";

/// Frame one payload as a single SSE event
pub fn frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + DATA_PREFIX.len() + 2);

    let mut rest = payload;
    loop {
        let end = rest
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
            .unwrap_or(rest.len());

        out.put_slice(DATA_PREFIX);
        out.put_slice(&rest[..end]);
        out.put_u8(b'\n');

        if end == rest.len() {
            break;
        }

        // Treat "\r\n" as one terminator
        let skip = if rest[end] == b'\r' && rest.get(end + 1) == Some(&b'\n') {
            2
        } else {
            1
        };
        rest = &rest[end + skip..];
    }

    out.put_u8(b'\n');
    out.freeze()
}
