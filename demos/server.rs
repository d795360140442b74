//! A small REST server built on NiceHTTP.
//! This demo shows route registration, pattern routes, token-protected routes
//! and shared state, then calls itself with the bundled client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nicehttp::{Request, Response, Route, Server, ServerConfig};

fn main() -> nicehttp::Result<()> {
    let config = ServerConfig::new()?;
    let (host, port) = (config.host.clone(), config.port);
    let server = Server::new(config);
    let router = server.router();

    router.add(Route::new("GET", "/", |_req: &Request| {
        Response::ok().with_body("Welcome to NiceHTTP!")
    })?)?;

    router.add(Route::new("GET", "/hello/[a-z]+", |req: &Request| {
        let name = req.uri.rsplit('/').next().unwrap_or("world");
        Response::ok().with_json(format!(r#"{{"greeting": "Hello, {}!"}}"#, name))
    })?)?;

    // Example of a route that modifies shared state
    let counter = Arc::new(AtomicUsize::new(0));
    router.add(Route::new("POST", "/counter", move |_req: &Request| {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Response::ok().with_json(format!(r#"{{"counter": {}}}"#, count))
    })?)?;

    router.add(
        Route::new("GET", "/admin", |_req: &Request| Response::ok().with_body("hi admin"))?
            .with_auth("s3cret"),
    )?;

    let listener = server.bind(&host, port)?;
    let addr = listener.local_addr()?;
    println!("Server running at http://{}", addr);
    println!("Try these routes:");
    println!("  - GET  /");
    println!("  - GET  /hello/your-name");
    println!("  - POST /counter (increments on each call)");
    println!("  - GET  /admin (needs `Authorization: s3cret`)");

    let handle = server.shutdown_handle();
    let serving = thread::spawn(move || listener.serve());

    thread::sleep(Duration::from_millis(100));
    let port = addr.port();
    for request in [
        Request::new("GET", "/hello/nicehttp"),
        Request::new("POST", "/counter"),
        Request::new("GET", "/admin"),
        Request::new("GET", "/admin").with_header("Authorization", "s3cret"),
        Request::new("GET", "/missing"),
    ] {
        let response = nicehttp::request(&request, "127.0.0.1", port)?;
        println!(
            "{} -> {} {} {}",
            request,
            response.code,
            response.message,
            response.body_str().unwrap_or("<binary>")
        );
    }

    if std::env::args().any(|arg| arg == "--once") {
        handle.shutdown();
    }

    match serving.join() {
        Ok(result) => result,
        Err(_) => {
            eprintln!("server thread panicked");
            Ok(())
        }
    }
}
