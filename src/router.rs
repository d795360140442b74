//! Method and URI-pattern routing with optional token authentication.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::error::{Error, Result};
use crate::http::{Request, Response};

/// Represents a route handler function that takes a request and returns a response.
/// The handler must be both `Send` and `Sync` to be safely shared across threads.
pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

const AUTHORIZATION: &str = "authorization";

/// A binding from a method and URI pattern to a handler.
///
/// The pattern is a regular expression matched against the whole request
/// URI, so `/test/[0-9]` matches `/test/5` but neither `/test/55` nor
/// `/x/test/5`. When an auth token is set, the request must carry an
/// `Authorization` header whose value is exactly that token.
#[derive(Clone)]
pub struct Route {
    method: String,
    pattern: String,
    regex: Regex,
    auth: Option<String>,
    handler: Handler,
}

impl Route {
    /// Creates a route, compiling its pattern.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPattern`] if the pattern is not a valid regular expression.
    pub fn new<F>(method: impl Into<String>, pattern: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            Error::InvalidPattern {
                pattern: pattern.clone(),
                source,
            }
        })?;

        Ok(Route {
            method: method.into(),
            pattern,
            regex,
            auth: None,
            handler: Arc::new(handler),
        })
    }

    /// Requires `Authorization: <token>` on every request. An empty token
    /// means no authentication.
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth = (!token.is_empty()).then_some(token);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn auth(&self) -> Option<&str> {
        self.auth.as_deref()
    }

    /// The identity of the route inside a [`Router`].
    pub fn key(&self) -> (&str, &str) {
        (&self.method, &self.pattern)
    }

    /// True if this route serves `method` on `uri`.
    pub fn matches(&self, method: &str, uri: &str) -> bool {
        self.method == method && self.regex.is_match(uri)
    }

    /// Checks authentication, then calls the handler.
    ///
    /// A panicking handler is answered with `500 Internal Server Error`.
    pub fn handle(&self, request: &Request) -> Response {
        if let Some(token) = &self.auth {
            if request.headers.get(AUTHORIZATION) != Some(token.as_str()) {
                log::debug!("{} {}: authorization refused", request.method, request.uri);
                return Response::unauthorized();
            }
        }

        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(request))) {
            Ok(response) => response,
            Err(cause) => {
                log::error!(
                    "handler for {} {} panicked: {}",
                    self.method,
                    self.pattern,
                    panic_message(&cause)
                );
                Response::internal_error()
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    cause
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// An ordered set of routes, safe to share between workers.
///
/// Routes are matched front to back in insertion order and the first match
/// wins. Routes can be added and removed while requests are being served.
#[derive(Debug, Default)]
pub struct Router {
    routes: RwLock<Vec<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateRoute`] if a route with the same method and
    /// pattern is already registered.
    pub fn add(&self, route: Route) -> Result<()> {
        let mut routes = self.routes.write().map_err(|_| Error::LockPoisoned)?;
        if routes.iter().any(|r| r.key() == route.key()) {
            return Err(Error::DuplicateRoute {
                method: route.method,
                pattern: route.pattern,
            });
        }
        log::debug!("route added: {} {}", route.method, route.pattern);
        routes.push(route);
        Ok(())
    }

    /// Removes the route registered for `method` and `pattern`, returning it.
    pub fn del(&self, method: &str, pattern: &str) -> Result<Option<Route>> {
        let mut routes = self.routes.write().map_err(|_| Error::LockPoisoned)?;
        let removed = routes
            .iter()
            .position(|r| r.key() == (method, pattern))
            .map(|i| routes.remove(i));
        Ok(removed)
    }

    /// Removes the route with the same identity as `route`.
    pub fn del_route(&self, route: &Route) -> Result<Option<Route>> {
        self.del(&route.method, &route.pattern)
    }

    pub fn len(&self) -> usize {
        self.routes.read().map(|routes| routes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the first route serving `method` on `uri`.
    pub fn find(&self, method: &str, uri: &str) -> Result<Option<Route>> {
        let routes = self.routes.read().map_err(|_| Error::LockPoisoned)?;
        Ok(routes.iter().find(|r| r.matches(method, uri)).cloned())
    }

    /// Dispatches a request to its route, or answers `404 Not Found`.
    ///
    /// The route is cloned out of the table before its handler runs, so a
    /// slow handler never holds up `add` or `del`.
    pub fn handle(&self, request: &Request) -> Response {
        match self.find(&request.method, &request.uri) {
            Ok(Some(route)) => route.handle(request),
            Ok(None) => Response::not_found(),
            Err(e) => {
                log::error!("route lookup failed: {}", e);
                Response::internal_error()
            }
        }
    }
}
