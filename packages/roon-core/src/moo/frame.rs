//! MOO/1 frame encoding and incremental decoding.
//!
//! Wire form:
//!
//! ```text
//! MOO/1 <VERB> <name>\n
//! Request-Id: <id>\n
//! Content-Length: <n>\n        (only with a body)
//! Content-Type: <type>\n       (only with a body)
//! \n
//! <body bytes>
//! ```

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};

use super::{Body, MessageType, MooError};
use crate::protocol_constants::{MAX_FRAME_BODY, MAX_FRAME_HEADER, MOO_PROTOCOL};

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    /// `service/verb` for requests, a reply name such as `Success` otherwise.
    pub name: String,
    pub request_id: u64,
    pub content_type: Option<String>,
    pub body: Body,
}

impl Frame {
    pub fn new(
        message_type: MessageType,
        name: impl Into<String>,
        request_id: u64,
        body: Body,
    ) -> Self {
        Self {
            message_type,
            name: name.into(),
            request_id,
            content_type: None,
            body,
        }
    }

    pub fn request(name: impl Into<String>, request_id: u64, body: Body) -> Self {
        Self::new(MessageType::Request, name, request_id, body)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The service part of a request name (before the first `/`).
    pub fn service(&self) -> &str {
        self.name.split('/').next().unwrap_or_default()
    }

    /// The verb part of a request name (after the first `/`).
    pub fn verb(&self) -> &str {
        self.name.split_once('/').map(|(_, v)| v).unwrap_or_default()
    }

    /// Encodes the frame into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let mut out = format!(
            "{} {} {}\nRequest-Id: {}\n",
            MOO_PROTOCOL, self.message_type, self.name, self.request_id
        );
        if !self.body.is_empty() {
            let content_type = self
                .content_type
                .as_deref()
                .or_else(|| self.body.default_content_type())
                .unwrap_or_default();
            out.push_str(&format!(
                "Content-Length: {}\nContent-Type: {}\n",
                body.len(),
                content_type
            ));
        }
        out.push('\n');

        let mut bytes = out.into_bytes();
        if !self.body.is_empty() {
            bytes.extend_from_slice(body);
        }
        bytes
    }

    /// Whether the body must be kept as opaque bytes.
    fn is_image(content_type: Option<&str>) -> bool {
        content_type.is_some_and(|ct| ct.trim_start().starts_with("image"))
    }

    /// Short description for logs. Never includes image payloads.
    pub fn summary(&self) -> String {
        let body = match &self.body {
            Body::Empty => String::new(),
            Body::Text(t) if t.len() > 200 => format!(" {}...", truncate_utf8(t, 200)),
            Body::Text(t) => format!(" {}", t),
            Body::Binary(b) => format!(" <{} bytes>", b.len()),
        };
        format!(
            "{} {} #{}{}",
            self.message_type, self.name, self.request_id, body
        )
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─────────────────────────────────────────────────────────────────────────────
// Header Parsing
// ─────────────────────────────────────────────────────────────────────────────

struct Header {
    message_type: MessageType,
    name: String,
    request_id: u64,
    content_length: usize,
    content_type: Option<String>,
}

/// Finds the blank line ending the header.
///
/// Returns `(header_len, body_start)`. A blank line may be `\n` or `\r\n`.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

fn header_lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// Looks up a header value (ASCII case-insensitive name).
fn header_value<'a>(raw: &'a str, key: &str) -> Option<&'a str> {
    header_lines(raw).skip(1).find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
    })
}

fn parse_header(raw: &[u8]) -> Result<Header, MooError> {
    let raw = std::str::from_utf8(raw)
        .map_err(|_| MooError::MalformedFrame("header is not UTF-8".into()))?;

    let first = header_lines(raw).next().unwrap_or_default();
    let mut parts = first.splitn(3, ' ');
    let protocol = parts.next().unwrap_or_default();
    if protocol != MOO_PROTOCOL {
        return Err(MooError::MalformedFrame(format!(
            "unexpected first line '{}'",
            first
        )));
    }
    let verb = parts.next().unwrap_or_default();
    let message_type = MessageType::parse(verb)
        .ok_or_else(|| MooError::MalformedFrame(format!("unknown verb '{}'", verb)))?;
    let name = parts.next().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        return Err(MooError::MalformedFrame("missing name".into()));
    }

    let request_id = header_value(raw, "Request-Id")
        .ok_or_else(|| MooError::MalformedFrame("missing Request-Id".into()))?
        .parse::<u64>()
        .map_err(|_| MooError::MalformedFrame("non-numeric Request-Id".into()))?;

    let content_length = match header_value(raw, "Content-Length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| MooError::MalformedFrame(format!("bad Content-Length '{}'", v)))?,
        None => 0,
    };

    Ok(Header {
        message_type,
        name,
        request_id,
        content_length,
        content_type: header_value(raw, "Content-Type").map(str::to_string),
    })
}

/// Best-effort body length of a header that failed to parse.
fn salvage_content_length(raw: &[u8]) -> usize {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|raw| header_value(raw, "Content-Length"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Total size of a frame, refusing lengths the reader will not buffer.
fn checked_frame_len(body_start: usize, content_length: usize) -> Result<usize, MooError> {
    if content_length > MAX_FRAME_BODY {
        return Err(MooError::FrameTooLarge(content_length));
    }
    body_start
        .checked_add(content_length)
        .ok_or(MooError::FrameTooLarge(content_length))
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame Reader
// ─────────────────────────────────────────────────────────────────────────────

/// Source of raw bytes, delivered in arbitrary chunks.
///
/// `None` means end of stream.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, MooError>>;
}

/// Reassembles frames from a [`ChunkSource`].
///
/// Bytes past the end of one frame are kept for the next.
pub struct FrameReader<S> {
    source: S,
    buf: BytesMut,
    /// Body bytes of a rejected frame still to be thrown away.
    skip: usize,
}

impl<S: ChunkSource> FrameReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buf: BytesMut::new(),
            skip: 0,
        }
    }

    /// Pulls one chunk into the buffer. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool, MooError> {
        match self.source.next_chunk().await {
            Some(Ok(chunk)) => {
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends between frames,
    /// [`MooError::Truncated`] when it ends inside one, and
    /// [`MooError::MalformedFrame`] for a complete frame with a bad header
    /// (the frame is consumed, so reading can continue).
    /// [`MooError::FrameTooLarge`] is fatal for the stream.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, MooError> {
        while self.skip > 0 {
            if self.buf.is_empty() && !self.fill().await? {
                return Err(MooError::Truncated);
            }
            let n = self.skip.min(self.buf.len());
            self.buf.advance(n);
            self.skip -= n;
        }

        let (header_len, body_start) = loop {
            if let Some(found) = find_header_end(&self.buf) {
                break found;
            }
            if self.buf.len() > MAX_FRAME_HEADER {
                return Err(MooError::FrameTooLarge(self.buf.len()));
            }
            if !self.fill().await? {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(MooError::Truncated)
                };
            }
        };

        let header = match parse_header(&self.buf[..header_len]) {
            Ok(header) => header,
            Err(e) => {
                let skip = salvage_content_length(&self.buf[..header_len]);
                checked_frame_len(body_start, skip)?;
                self.skip = skip;
                self.buf.advance(body_start);
                return Err(e);
            }
        };

        let frame_len = checked_frame_len(body_start, header.content_length)?;
        while self.buf.len() < frame_len {
            if !self.fill().await? {
                return Err(MooError::Truncated);
            }
        }

        let mut frame_bytes = self.buf.split_to(frame_len);
        frame_bytes.advance(body_start);
        let payload = frame_bytes.freeze();

        let body = if payload.is_empty() {
            Body::Empty
        } else if Frame::is_image(header.content_type.as_deref()) {
            Body::Binary(payload)
        } else {
            match String::from_utf8(payload.to_vec()) {
                Ok(text) => Body::Text(text),
                Err(_) => {
                    log::debug!(
                        "[MOO] Non-UTF-8 body on {} #{}, keeping bytes",
                        header.name,
                        header.request_id
                    );
                    Body::Binary(payload)
                }
            }
        };

        Ok(Some(Frame {
            message_type: header.message_type,
            name: header.name,
            request_id: header.request_id,
            content_type: header.content_type,
            body,
        }))
    }
}
