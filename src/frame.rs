//! Assembles one complete HTTP message off a byte stream.
//!
//! The reader accumulates the head until the `\r\n\r\n` boundary, learns the
//! declared body length from it, and keeps reading until the body reaches that
//! length or the peer stops sending. Reaching the length, EOF and a socket
//! error all end the frame normally; [`FrameEnd`] records which one did.
//! Bytes past a declared length are dropped.

use std::io::{self, Read};

use crate::error::FrameError;
use crate::http::{parse_headers, Headers};

const BOUNDARY: &[u8] = b"\r\n\r\n";

/// Which side of the exchange is being read, deciding what an absent
/// `Content-Length` means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// No declared length means no body.
    Request,
    /// No declared length means the body runs until the peer closes.
    Response,
}

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// The head and the declared body were read in full.
    Complete,
    /// The peer closed the connection.
    Eof,
    /// A read failed; the frame holds whatever arrived before.
    Error(io::ErrorKind),
}

/// One message as delimited on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Start line and headers, including the terminating blank line when one
    /// was seen.
    pub head: Vec<u8>,
    pub body: Vec<u8>,
    pub end: FrameEnd,
}

impl Frame {
    /// True when nothing at all was received.
    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.body.is_empty()
    }
}

/// Reads frames from `R` in chunks of `block_size` bytes.
pub struct FrameReader<R> {
    inner: R,
    block_size: usize,
    max_head_bytes: usize,
    max_body_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, block_size: usize) -> Self {
        FrameReader {
            inner,
            block_size: block_size.max(1),
            max_head_bytes: usize::MAX,
            max_body_bytes: usize::MAX,
        }
    }

    pub fn max_head_bytes(mut self, limit: usize) -> Self {
        self.max_head_bytes = limit;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads a single frame.
    ///
    /// # Errors
    /// Fails only when a configured size limit is exceeded; I/O errors end the
    /// frame with [`FrameEnd::Error`].
    pub fn read_frame(&mut self, kind: FrameKind) -> Result<Frame, FrameError> {
        let mut chunk = vec![0u8; self.block_size];
        let mut head = Vec::new();
        let mut body = Vec::new();
        // declared body length, known once the boundary is found
        let mut expected: Option<usize> = None;

        let end = loop {
            if let Some(len) = expected {
                if body.len() >= len {
                    break FrameEnd::Complete;
                }
            }

            let n = match self.inner.read(&mut chunk) {
                Ok(0) => break FrameEnd::Eof,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("read failed while framing: {}", e);
                    break FrameEnd::Error(e.kind());
                }
            };
            let bytes = &chunk[..n];

            if let Some(len) = expected {
                body.extend_from_slice(bytes);
                if len == usize::MAX && body.len() > self.max_body_bytes {
                    return Err(FrameError::BodyTooLarge {
                        declared: body.len(),
                        limit: self.max_body_bytes,
                    });
                }
                continue;
            }

            // the boundary may straddle the previous chunk
            let from = head.len().saturating_sub(BOUNDARY.len() - 1);
            head.extend_from_slice(bytes);

            match find(&head[from..], BOUNDARY) {
                Some(at) => {
                    let split = from + at + BOUNDARY.len();
                    body = head.split_off(split);
                    if head.len() > self.max_head_bytes {
                        return Err(FrameError::HeadTooLarge {
                            limit: self.max_head_bytes,
                        });
                    }
                    let declared = declared_length(&head);
                    if declared > self.max_body_bytes {
                        return Err(FrameError::BodyTooLarge {
                            declared,
                            limit: self.max_body_bytes,
                        });
                    }
                    expected = Some(match (declared, kind) {
                        (0, FrameKind::Request) => 0,
                        (0, FrameKind::Response) => usize::MAX,
                        (len, _) => len,
                    });
                }
                None if head.len() > self.max_head_bytes => {
                    return Err(FrameError::HeadTooLarge {
                        limit: self.max_head_bytes,
                    });
                }
                None => {}
            }
        };

        // a declared length is the whole body; anything after it is not ours
        if let Some(len) = expected.filter(|len| *len != usize::MAX) {
            if body.len() > len {
                log::debug!("dropping {} bytes past the declared body", body.len() - len);
                body.truncate(len);
            }
        }

        if kind == FrameKind::Response && body.len() > self.max_body_bytes {
            return Err(FrameError::BodyTooLarge {
                declared: body.len(),
                limit: self.max_body_bytes,
            });
        }

        log::trace!(
            "frame read: {} head bytes, {} body bytes, {:?}",
            head.len(),
            body.len(),
            end
        );
        Ok(Frame { head, body, end })
    }

    pub fn read_request(&mut self) -> Result<Frame, FrameError> {
        self.read_frame(FrameKind::Request)
    }

    pub fn read_response(&mut self) -> Result<Frame, FrameError> {
        self.read_frame(FrameKind::Response)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Runs the header parser over a complete head to learn its body length.
fn declared_length(head: &[u8]) -> usize {
    let head = String::from_utf8_lossy(head);
    let headers = match head.split_once('\n') {
        Some((_, rest)) => rest,
        None => return 0,
    };
    parse_headers(headers, &mut Headers::new()).content_length
}
