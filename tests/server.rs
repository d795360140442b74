//! End-to-end tests: a real server on a loopback port, driven by the client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use nicehttp::{Client, Request, Response, Result, Route, Server, ServerConfig, ShutdownHandle};

/// A server running on a background thread; shuts down when dropped.
struct Running {
    addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<thread::JoinHandle<Result<()>>>,
}

impl Running {
    fn start(server: Server) -> Self {
        let listener = server.bind("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || listener.serve());
        Running {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    fn send(&self, request: &Request) -> Response {
        Client::default()
            .request(request, "127.0.0.1", self.addr.port())
            .unwrap()
    }

    fn raw(&self, chunks: &[&[u8]]) -> String {
        let mut stream = TcpStream::connect(self.addr).unwrap();
        stream.set_nodelay(true).unwrap();
        for chunk in chunks {
            stream.write_all(chunk).unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();
        reply
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn config() -> ServerConfig {
    ServerConfig {
        idle_timeout_secs: 0,
        read_timeout_secs: 5,
        ..ServerConfig::default()
    }
}

fn echo(req: &Request) -> Response {
    Response::ok().with_body(req.body.clone())
}

fn tagged(tag: &'static str) -> impl Fn(&Request) -> Response + Send + Sync {
    move |_: &Request| Response::ok().with_body(tag)
}

#[test]
fn test_exact_method_dispatch() {
    let server = Server::new(config());
    server.router().add(Route::new("GET", "/a", tagged("get")).unwrap()).unwrap();
    server.router().add(Route::new("POST", "/a", tagged("post")).unwrap()).unwrap();
    let running = Running::start(server);

    assert_eq!(running.send(&Request::new("GET", "/a")).body, b"get");
    assert_eq!(running.send(&Request::new("POST", "/a")).body, b"post");
}

#[test]
fn test_pattern_dispatch() {
    let server = Server::new(config());
    server
        .router()
        .add(Route::new("GET", "/test/[0-9]", tagged("digit")).unwrap())
        .unwrap();
    let running = Running::start(server);

    assert_eq!(running.send(&Request::new("GET", "/test/5")).code, 200);
    assert_eq!(running.send(&Request::new("GET", "/test/ab")).code, 404);
    assert_eq!(running.send(&Request::new("GET", "/test/55")).code, 404);
}

/// Tests that an unregistered route answers an empty 404 carrying the
/// server headers.
#[test]
fn test_not_found_fallback() {
    let running = Running::start(Server::new(config()));

    let response = running.send(&Request::new("GET", "/nowhere"));
    assert_eq!(response.code, 404);
    assert_eq!(response.message, "Not Found");
    assert_eq!(response.content_length, 0);
    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("server"), Some("NiceHTTP"));
    assert_eq!(response.headers.get("connection"), Some("close"));
}

#[test]
fn test_auth_enforcement() {
    let server = Server::new(config());
    server
        .router()
        .add(Route::new("GET", "/secret", tagged("secret")).unwrap().with_auth("tok1"))
        .unwrap();
    let running = Running::start(server);

    let missing = running.send(&Request::new("GET", "/secret"));
    assert_eq!(missing.code, 401);
    assert_eq!(missing.message, "Unauthorized");

    let wrong = running.send(&Request::new("GET", "/secret").with_header("Authorization", "nope"));
    assert_eq!(wrong.code, 401);

    let ok = running.send(&Request::new("GET", "/secret").with_header("Authorization", "tok1"));
    assert_eq!(ok.code, 200);
    assert_eq!(ok.body, b"secret");
}

/// Tests that JSON bodies and custom headers survive the trip both ways.
#[test]
fn test_json_round_trip() {
    let server = Server::new(config());
    server
        .router()
        .add(
            Route::new("POST", "/items", |req: &Request| {
                assert!(req.is_json);
                Response::new(201, "Created")
                    .with_header("X-Seen", req.headers.get("x-trace").unwrap_or("-"))
                    .with_json(req.body.clone())
            })
            .unwrap(),
        )
        .unwrap();
    let running = Running::start(server);

    let body = r#"{"name": "widget", "tags": ["a b", "c"]}"#;
    let response = running.send(
        &Request::new("POST", "/items")
            .with_header("X-Trace", "abc")
            .with_json(body),
    );

    assert_eq!(response.code, 201);
    assert_eq!(response.message, "Created");
    assert!(response.is_json);
    assert_eq!(response.body_str(), Some(body));
    assert_eq!(response.headers.get("x-seen"), Some("abc"));
}

/// Tests a request delivered in pieces, split right at the head/body boundary
/// and with the body trickling in byte by byte.
#[test]
fn test_fragmented_request() {
    let server = Server::new(config());
    server.router().add(Route::new("POST", "/echo", echo).unwrap()).unwrap();
    let running = Running::start(server);

    let head: &[u8] = b"POST /echo HTTP/1.1\r\nContent-Length: 6\r\n\r\n";
    let mut chunks = vec![&head[..10], &head[10..]];
    let body = b"abcdef";
    chunks.extend(body.chunks(1));

    let reply = running.raw(&chunks);
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{}", reply);
    assert!(reply.ends_with("\r\n\r\nabcdef"), "{}", reply);
}

/// Tests a binary body larger than one read block.
#[test]
fn test_large_binary_body() {
    let server = Server::new(ServerConfig {
        block_size: 512,
        ..config()
    });
    server.router().add(Route::new("PUT", "/blob", echo).unwrap()).unwrap();
    let running = Running::start(server);

    let body: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let response = running.send(&Request::new("PUT", "/blob").with_body(body.clone()));
    assert_eq!(response.content_length, body.len());
    assert_eq!(response.body, body);
}

/// Tests that a response with a zero length goes out without a body.
#[test]
fn test_body_omission() {
    let server = Server::new(config());
    server
        .router()
        .add(
            Route::new("GET", "/quiet", |_: &Request| {
                let mut response = Response::ok();
                response.body = b"never sent".to_vec();
                response
            })
            .unwrap(),
        )
        .unwrap();
    let running = Running::start(server);

    let reply = running.raw(&[&b"GET /quiet HTTP/1.1\r\n\r\n"[..]]);
    assert!(reply.ends_with("\r\n\r\n"), "{}", reply);
    assert!(!reply.contains("never sent"));
}

#[test]
fn test_handler_panic_answers_500() {
    let server = Server::new(config());
    server
        .router()
        .add(Route::new("GET", "/boom", |_: &Request| -> Response { panic!("handler fault") }).unwrap())
        .unwrap();
    server.router().add(Route::new("GET", "/fine", tagged("fine")).unwrap()).unwrap();
    let running = Running::start(server);

    assert_eq!(running.send(&Request::new("GET", "/boom")).code, 500);
    // the worker survives and keeps serving
    assert_eq!(running.send(&Request::new("GET", "/fine")).body, b"fine");
}

/// Tests more concurrent requests than workers, each to its own route. The
/// first pool's worth of handlers block on a barrier, so they only finish if
/// they really ran at the same time; the rest queue behind them.
#[test]
fn test_concurrent_independence() {
    const WORKERS: usize = 3;
    const REQUESTS: usize = 12;

    let server = Server::new(ServerConfig {
        max_workers: WORKERS,
        ..config()
    });
    let barrier = Arc::new(Barrier::new(WORKERS));
    for i in 0..REQUESTS {
        let barrier = barrier.clone();
        let route = Route::new("GET", format!("/r/{}", i), move |_: &Request| {
            if i < WORKERS {
                barrier.wait();
            }
            Response::ok().with_body(format!("route {}", i))
        })
        .unwrap();
        server.router().add(route).unwrap();
    }
    let running = Arc::new(Running::start(server));

    let first: Vec<_> = (0..WORKERS)
        .map(|i| {
            let running = running.clone();
            thread::spawn(move || (i, running.send(&Request::new("GET", format!("/r/{}", i)))))
        })
        .collect();
    let rest: Vec<_> = (WORKERS..REQUESTS)
        .map(|i| {
            let running = running.clone();
            thread::spawn(move || (i, running.send(&Request::new("GET", format!("/r/{}", i)))))
        })
        .collect();

    for handle in first.into_iter().chain(rest) {
        let (i, response) = handle.join().unwrap();
        assert_eq!(response.code, 200);
        assert_eq!(response.body_str(), Some(format!("route {}", i).as_str()));
    }
}

/// Tests that routes added while the server runs are picked up.
#[test]
fn test_routes_change_while_serving() {
    let server = Server::new(config());
    let listener = server.bind("127.0.0.1", 0).unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = server.shutdown_handle();
    let serving = thread::spawn(move || listener.serve());
    let client = Client::default();

    let request = Request::new("GET", "/late");
    assert_eq!(client.request(&request, "127.0.0.1", port).unwrap().code, 404);

    server.router().add(Route::new("GET", "/late", tagged("late")).unwrap()).unwrap();
    assert_eq!(client.request(&request, "127.0.0.1", port).unwrap().body, b"late");

    server.router().del("GET", "/late").unwrap();
    assert_eq!(client.request(&request, "127.0.0.1", port).unwrap().code, 404);

    shutdown.shutdown();
    serving.join().unwrap().unwrap();
}

#[test]
fn test_peer_closing_without_request() {
    let server = Server::new(config());
    server.router().add(Route::new("GET", "/a", tagged("a")).unwrap()).unwrap();
    let running = Running::start(server);

    drop(TcpStream::connect(running.addr).unwrap());
    // the server shrugs it off and keeps serving
    assert_eq!(running.send(&Request::new("GET", "/a")).body, b"a");
}
