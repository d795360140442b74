//! The serving side of the connection dispatcher.
//!
//! A single thread polls the listening socket and accepts connections; every
//! accepted connection becomes one job on the worker pool, which reads the
//! request, routes it, writes the response and closes the socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::ServerConfig;
use crate::error::{display_addr, Error, FrameError, Result};
use crate::executor::Executor;
use crate::frame::{FrameEnd, FrameReader};
use crate::http::{Request, Response};
use crate::router::Router;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);

/// An HTTP server: a router plus the configuration to serve it with.
///
/// ```no_run
/// use nicehttp::{Request, Response, Route, Server, ServerConfig};
///
/// fn main() -> nicehttp::Result<()> {
///     let server = Server::new(ServerConfig::default());
///     server.router().add(Route::new("GET", "/test", |_req: &Request| {
///         Response::ok().with_json(r#"{"status": "OK"}"#)
///     })?)?;
///     server.start("127.0.0.1", 8090)
/// }
/// ```
pub struct Server {
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    shutdown: Arc<ShutdownState>,
}

#[derive(Default)]
struct ShutdownState {
    requested: AtomicBool,
    waker: Mutex<Option<Arc<Waker>>>,
}

/// Stops a running server from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Makes the accept loop return. Connections already handed to workers
    /// still complete.
    pub fn shutdown(&self) {
        self.state.requested.store(true, Ordering::Release);
        let waker = match self.state.waker.lock() {
            Ok(waker) => waker.clone(),
            Err(_) => return,
        };
        if let Some(waker) = waker {
            if let Err(e) = waker.wake() {
                log::warn!("failed to wake the accept loop: {}", e);
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.requested.load(Ordering::Acquire)
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server {
            config: Arc::new(config),
            router: Arc::new(Router::new()),
            shutdown: Arc::default(),
        }
    }

    /// The route table; routes may be added or removed while serving.
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: self.shutdown.clone(),
        }
    }

    /// Binds the listening socket without serving yet. Clears any shutdown
    /// requested before.
    ///
    /// # Errors
    /// Returns [`Error::Bind`] if the address cannot be bound, or an I/O
    /// error if the poller cannot be set up.
    pub fn bind(&self, iface: &str, port: u16) -> Result<Listener> {
        let listener =
            TcpListener::bind((iface, port)).map_err(|e| Error::bind(display_addr(iface, port), e))?;
        listener.set_nonblocking(true)?;

        let poll = Poll::new()?;
        let mut source = mio::net::TcpListener::from_std(listener.try_clone()?);
        poll.registry()
            .register(&mut source, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        {
            let mut slot = self.shutdown.waker.lock().map_err(|_| Error::LockPoisoned)?;
            *slot = Some(waker);
        }
        // a shutdown of an earlier listener does not carry over
        self.shutdown.requested.store(false, Ordering::Release);

        let executor = Executor::new(self.config.workers(), Some(self.config.worker_keep_alive()));
        log::debug!("worker pool of up to {} threads", executor.max_workers());

        Ok(Listener {
            listener,
            _source: source,
            poll,
            executor,
            config: self.config.clone(),
            router: self.router.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    /// Binds `iface:port` and serves until the listening socket fails, the
    /// idle timeout elapses or a shutdown is requested.
    pub fn start(&self, iface: &str, port: u16) -> Result<()> {
        self.bind(iface, port)?.serve()
    }
}

/// A bound server, ready to run its accept loop.
pub struct Listener {
    listener: TcpListener,
    // keeps the registration alive for the lifetime of the poller
    _source: mio::net::TcpListener,
    poll: Poll,
    executor: Executor,
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    shutdown: Arc<ShutdownState>,
}

impl Listener {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop on the calling thread.
    ///
    /// # Errors
    /// Returns [`Error::Poll`] if polling the listening socket fails. Accept
    /// failures on single connections are logged and skipped.
    pub fn serve(mut self) -> Result<()> {
        let mut events = Events::with_capacity(64);
        let idle_timeout = self.config.idle_timeout();
        log::info!("listening on {}", self.local_addr()?);

        loop {
            if self.shutdown.requested.load(Ordering::Acquire) {
                log::info!("shutdown requested, {} workers still alive", self.executor.workers());
                return Ok(());
            }

            if let Err(e) = self.poll.poll(&mut events, idle_timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("polling error: {}", e);
                return Err(Error::Poll(e));
            }

            if events.is_empty() && idle_timeout.is_some() {
                log::info!("no activity for {:?}, stopping", idle_timeout);
                return Ok(());
            }

            for event in events.iter() {
                if event.token() == LISTENER {
                    self.accept_all();
                }
            }
        }
    }

    /// Accepts until the listener would block, handing each connection to
    /// the pool.
    fn accept_all(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {}", peer);
                    self.dispatch(stream, peer);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("failed to accept incoming connection: {}", e);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let router = self.router.clone();
        let config = self.config.clone();

        let job = move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                serve_connection(&stream, &router, &config)
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("connection from {} failed: {}", peer, e),
                Err(_) => log::error!("connection from {} panicked", peer),
            }
            let _ = stream.shutdown(Shutdown::Both);
        };

        if let Err(e) = self.executor.execute(job) {
            log::error!("cannot dispatch connection from {}: {}", peer, e);
        }
    }
}

/// Runs one exchange: read request, route, write response.
fn serve_connection(stream: &TcpStream, router: &Router, config: &ServerConfig) -> io::Result<()> {
    // accepted sockets may inherit non-blocking mode from the listener
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(config.read_timeout())?;
    stream.set_write_timeout(config.write_timeout())?;

    let reader = Deadline {
        stream,
        read_timeout: config.read_timeout(),
        deadline: config.request_timeout().map(|budget| Instant::now() + budget),
    };
    let Some(response) = respond(reader, router, config) else {
        log::debug!("no request received");
        return Ok(());
    };
    log::debug!("{}", response);

    let mut writer = stream;
    writer.write_all(&response.to_bytes())?;
    writer.flush()
}

/// A socket reader that keeps every read inside the request deadline, so a
/// client trickling bytes cannot hold a worker past it.
struct Deadline<'a> {
    stream: &'a TcpStream,
    read_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Read for Deadline<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            let timeout = self.read_timeout.map_or(remaining, |t| t.min(remaining));
            self.stream.set_read_timeout(Some(timeout))?;
        }

        let mut stream = self.stream;
        match stream.read(buf) {
            // unix reports an expired socket timeout as WouldBlock
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(io::ErrorKind::TimedOut.into()),
            other => other,
        }
    }
}

/// Builds the response for the request waiting on `stream`, or `None` when
/// the peer sent nothing at all.
fn respond<R: Read>(stream: R, router: &Router, config: &ServerConfig) -> Option<Response> {
    let mut reader = FrameReader::new(stream, config.block_size)
        .max_head_bytes(config.max_head_bytes)
        .max_body_bytes(config.max_body_bytes);

    let response = match reader.read_request() {
        Ok(frame) if frame.is_empty() => return None,
        Ok(frame) if frame.end == FrameEnd::Error(io::ErrorKind::TimedOut) => {
            log::debug!("request not complete in time, {} bytes read", frame.head.len() + frame.body.len());
            Response::request_timeout()
        }
        Ok(frame) => {
            if let FrameEnd::Error(kind) = frame.end {
                log::debug!("request read ended early: {:?}", kind);
            }
            let head = String::from_utf8_lossy(&frame.head);
            let parsed = Request::parse(&head, frame.body);
            if config.strict && parsed.is_malformed() {
                log::debug!("rejecting malformed request: {:?}", parsed.issues);
                Response::bad_request()
            } else {
                let request = parsed.message;
                log::debug!("{} {}", request.method, request.uri);
                router.handle(&request)
            }
        }
        Err(e @ FrameError::HeadTooLarge { .. }) => {
            log::debug!("{}", e);
            Response::header_fields_too_large()
        }
        Err(e @ FrameError::BodyTooLarge { .. }) => {
            log::debug!("{}", e);
            Response::payload_too_large()
        }
    };

    Some(finish(response, config))
}

/// Adds the headers every server response carries.
fn finish(response: Response, config: &ServerConfig) -> Response {
    response
        .with_header("Server", config.server_name.as_str())
        .with_header("Connection", "close")
}
