//! The calling side of the connection dispatcher: one connection per request.

use std::io::Write;
use std::net::{Shutdown, TcpStream};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameEnd, FrameReader};
use crate::http::{Request, Response};

/// A synchronous HTTP client.
///
/// Each call opens a new connection, sends the request, reads one response
/// and closes the connection.
#[derive(Debug, Clone, Default)]
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one round trip to `host:port`.
    ///
    /// Problems in the reply itself, such as a body shorter than declared,
    /// are logged and the response is returned as received.
    ///
    /// # Errors
    /// Returns [`Error::Connect`] if no connection can be opened, an I/O
    /// error if the request cannot be written, or [`Error::Frame`] if the
    /// reply exceeds the configured limits.
    pub fn request(&self, request: &Request, host: &str, port: u16) -> Result<Response> {
        let stream = TcpStream::connect((host, port)).map_err(|source| Error::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        stream.set_read_timeout(self.config.read_timeout())?;
        stream.set_write_timeout(self.config.write_timeout())?;

        log::debug!("{} -> {}:{}", request, host, port);
        let result = self.exchange(&stream, request);
        let _ = stream.shutdown(Shutdown::Both);
        result
    }

    fn exchange(&self, stream: &TcpStream, request: &Request) -> Result<Response> {
        let mut writer = stream;
        writer.write_all(&request.to_bytes())?;
        writer.flush()?;

        let frame = FrameReader::new(stream, self.config.block_size)
            .max_head_bytes(self.config.max_head_bytes)
            .max_body_bytes(self.config.max_body_bytes)
            .read_response()?;

        if let FrameEnd::Error(kind) = frame.end {
            log::warn!("response read ended early: {:?}", kind);
        }

        let head = String::from_utf8_lossy(&frame.head);
        let response = Response::parse(&head, frame.body).into_inner();
        log::debug!("{}", response);
        Ok(response)
    }
}

/// Performs one round trip with the default client configuration.
///
/// ```no_run
/// use nicehttp::Request;
///
/// let response = nicehttp::request(&Request::new("GET", "/test"), "127.0.0.1", 8090)?;
/// println!("{} {}", response.code, response.message);
/// # Ok::<(), nicehttp::Error>(())
/// ```
pub fn request(request: &Request, host: &str, port: u16) -> Result<Response> {
    Client::default().request(request, host, port)
}
